//! Configuration module for serial-transport.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_TRANSPORT_CONFIG` environment variable (explicit path)
//! 2. `./serial-transport.toml` (current directory)
//! 3. `serial-transport.toml` in the platform config directory
//!    (`~/.config/serial-transport/` on Linux)
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `SERIAL_TRANSPORT_<SECTION>_<KEY>`
//!
//! Examples:
//! - `SERIAL_TRANSPORT_SERIAL_DEFAULT_BAUD=9600`
//! - `SERIAL_TRANSPORT_READ_LOOP_CHUNK_SIZE=256`
//! - `SERIAL_TRANSPORT_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_transport::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//! println!("Default baud: {}", config.serial.default_baud);
//! # Ok::<(), serial_transport::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    ActivityConfig, Config, LogFormat, LoggingConfig, ReadLoopConfig, SerialConfig,
};
