//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_TRANSPORT";

/// Config file name
const CONFIG_FILE_NAME: &str = "serial-transport.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_TRANSPORT_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_TRANSPORT_CONFIG` environment variable (explicit path)
    /// 2. `./serial-transport.toml` (current directory)
    /// 3. The platform config directory (`ProjectDirs`)
    /// 4. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;
        debug!(path = ?config_path, "configuration loaded");

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file, no overrides).
    pub fn with_defaults() -> Self {
        Self {
            config_path: None,
            config: Config::default(),
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    get_default_config_path().filter(|path| path.exists())
}

/// Get the platform config directory for this application.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "serial-transport").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Platform-default location of the config file.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Parse `SERIAL_TRANSPORT_<key>` into `target` when it is set.
fn override_from_env<T: FromStr>(key: &str, target: &mut T) -> ConfigResult<()> {
    let var = format!("{ENV_PREFIX}_{key}");
    if let Ok(value) = std::env::var(&var) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::env_parse(&var, format!("invalid value '{value}'")))?;
    }
    Ok(())
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `SERIAL_TRANSPORT_<SECTION>_<KEY>`
/// For example:
/// - `SERIAL_TRANSPORT_SERIAL_DEFAULT_BAUD=9600`
/// - `SERIAL_TRANSPORT_READ_LOOP_READ_TIMEOUT_MS=250`
/// - `SERIAL_TRANSPORT_LOGGING_FORMAT=json`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    override_from_env("SERIAL_DEFAULT_BAUD", &mut config.serial.default_baud)?;
    override_from_env("SERIAL_INITIAL_DTR", &mut config.serial.initial_dtr)?;
    override_from_env("SERIAL_INITIAL_RTS", &mut config.serial.initial_rts)?;

    override_from_env("READ_LOOP_READ_TIMEOUT_MS", &mut config.read_loop.read_timeout_ms)?;
    override_from_env("READ_LOOP_CHUNK_SIZE", &mut config.read_loop.chunk_size)?;

    override_from_env("ACTIVITY_CAPACITY", &mut config.activity.capacity)?;
    override_from_env(
        "ACTIVITY_RECEIVED_CAPACITY",
        &mut config.activity.received_capacity,
    )?;

    override_from_env("LOGGING_LEVEL", &mut config.logging.level)?;
    override_from_env("LOGGING_FORMAT", &mut config.logging.format)?;

    Ok(())
}
