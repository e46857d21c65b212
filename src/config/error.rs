//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file '{path}': {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML content.
    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration validation failed.
    #[error("{0}")]
    ValidationError(String),

    /// Configuration file not found.
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    /// Port or port pair could not be parsed or is out of range.
    #[error("Invalid port number: {0}")]
    InvalidPort(String),

    /// No destination host was given on the command line or in a file.
    #[error("missing destination host")]
    MissingHost,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
