//! Tracing subscriber setup.
//!
//! Call [`init_tracing`] once at startup. Output goes to stderr so that
//! received serial data on stdout stays clean.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG`, when set, replaces the configured level. Fails if the level
/// directive is malformed or a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::builder().parse(directives)?,
        _ => EnvFilter::builder().parse(&config.level)?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => registry.with(fmt_layer.json()).try_init()?,
        LogFormat::Pretty => registry.with(fmt_layer.pretty()).try_init()?,
        LogFormat::Compact => registry.with(fmt_layer.compact()).try_init()?,
    }
    Ok(())
}
