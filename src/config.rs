//! Board configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`.taskboard.toml`)
//! 2. Environment variables (with `TASKBOARD_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [taskboard]
//! name = "Device tasks"
//! static_targets = true
//!
//! [taskboard.logging]
//! level = "taskboard=debug,info"
//! pretty = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".taskboard.toml";

/// Operator console configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Title shown by the presentation layer.
    pub name: String,

    /// Compute the target list once at construction instead of on every
    /// overview.
    pub static_targets: bool,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            name: "Tasks".to_string(),
            static_targets: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl BoardConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML configuration file
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the file exists but is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            taskboard: BoardConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(full.taskboard)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("TASKBOARD_NAME") {
            self.name = name;
        }
        if let Ok(v) = std::env::var("TASKBOARD_STATIC_TARGETS") {
            if let Ok(b) = v.parse() {
                self.static_targets = b;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TASKBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(v) = std::env::var("TASKBOARD_LOG_PRETTY") {
            if let Ok(b) = v.parse() {
                self.logging.pretty = b;
            }
        }
    }

    /// Configuration suited to local development: verbose, pretty logs.
    pub fn development() -> Self {
        Self {
            logging: LoggingConfig {
                level: "taskboard=debug,info".to_string(),
                pretty: true,
            },
            ..Self::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub level: String,

    /// Multi-line human readable output instead of compact lines.
    pub pretty: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            pretty: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BoardConfig::default();
        assert_eq!(config.name, "Tasks");
        assert!(!config.static_targets);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.pretty);
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [taskboard]
            name = "Device tasks"
            static_targets = true

            [taskboard.logging]
            level = "debug"
        "#;

        let config = BoardConfig::from_toml(toml).unwrap();
        assert_eq!(config.name, "Device tasks");
        assert!(config.static_targets);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.pretty);
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let config = BoardConfig::from_toml("[other]\nkey = 1\n").unwrap();
        assert_eq!(config, BoardConfig::default());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            BoardConfig::from_toml("[taskboard\nname = "),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            BoardConfig::from_file("/nonexistent/.taskboard.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_development_config() {
        let config = BoardConfig::development();
        assert!(config.logging.pretty);
        assert!(config.logging.level.contains("taskboard=debug"));
    }
}
