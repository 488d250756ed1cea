//! Application configuration management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::proxy::DEFAULT_MAX_ENTRIES;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub proxy: ProxyConfig,

    /// Capture store settings
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listen address
    pub listen_addr: String,

    /// Proxy listen port
    pub port: u16,

    /// Listen backlog
    pub backlog: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Maximum captured entries kept; the oldest is evicted beyond this.
    pub max_entries: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: 8888,
            backlog: 100,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Config {
    /// Load configuration from the given file, or from the default location,
    /// falling back to defaults when no file exists.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                    path: config_path.display().to_string(),
                    source,
                })?;

            let config: Config =
                toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

            tracing::info!("loaded configuration from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("no configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to the given file or the default location.
    pub fn save(&self, path: Option<&str>) -> Result<(), ConfigError> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: config_path.display().to_string(),
                source,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(&config_path, contents).map_err(|source| ConfigError::Write {
            path: config_path.display().to_string(),
            source,
        })?;

        tracing::info!("saved configuration to {:?}", config_path);
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.port == 0 {
            return Err(ConfigError::Validation {
                field: "proxy.port".to_string(),
                reason: "port cannot be 0".to_string(),
            });
        }
        if self.proxy.backlog == 0 {
            return Err(ConfigError::Validation {
                field: "proxy.backlog".to_string(),
                reason: "backlog must be greater than 0".to_string(),
            });
        }
        if self.capture.max_entries == 0 {
            return Err(ConfigError::Validation {
                field: "capture.max_entries".to_string(),
                reason: "max_entries must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    fn default_config_path() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "holdfast", "holdfast")
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Data directory for logs and exports.
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        let dirs = directories::ProjectDirs::from("io", "holdfast", "holdfast")
            .ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.proxy.listen_addr, "0.0.0.0");
        assert_eq!(config.proxy.port, 8888);
        assert_eq!(config.proxy.backlog, 100);
        assert_eq!(config.capture.max_entries, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("[proxy]\nport = 9999\n").unwrap();
        assert_eq!(config.proxy.port, 9999);
        assert_eq!(config.proxy.listen_addr, "0.0.0.0");
        assert_eq!(config.capture.max_entries, 500);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = Config::default();
        config.proxy.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&toml).unwrap();
        assert_eq!(back.proxy.port, config.proxy.port);
        assert_eq!(back.capture.max_entries, config.capture.max_entries);
    }

    #[test]
    fn test_save_then_load_round_trips_through_file() {
        let path = std::env::temp_dir().join(format!(
            "holdfast-config-test-{}.toml",
            std::process::id()
        ));
        let path_str = path.to_str().unwrap();

        let mut config = Config::default();
        config.proxy.port = 9191;
        config.capture.max_entries = 42;
        config.save(Some(path_str)).unwrap();

        let loaded = Config::load(Some(path_str)).unwrap();
        assert_eq!(loaded.proxy.port, 9191);
        assert_eq!(loaded.capture.max_entries, 42);
        assert_eq!(loaded.proxy.listen_addr, config.proxy.listen_addr);

        std::fs::remove_file(&path).unwrap();
    }
}
