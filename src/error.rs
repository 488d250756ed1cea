//! Error types for holdfast
//!
//! Only startup and configuration failures surface as errors; data-path
//! failures inside the engine are absorbed into each entry's status and
//! never cross a task boundary.

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration value: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to write configuration file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("could not determine configuration directory")]
    NoConfigDir,
}

/// Proxy server errors; a bind failure is fatal at startup.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid listen address: {addr}")]
    InvalidListenAddr { addr: String },

    #[error("failed to bind proxy listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}
