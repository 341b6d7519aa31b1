//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries that want them printed
//! call [`init`] once at startup.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Installs a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over [`LoggingConfig::level`]. Calling this
/// again after a subscriber is installed is a no-op.
///
/// # Errors
///
/// Returns [`ConfigError::Logging`] if the filter directives are invalid.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Logging(e.to_string()))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if config.pretty {
        builder.pretty().try_init()
    } else {
        builder.compact().try_init()
    };

    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}
