//! Configuration error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    /// Config file is not valid TOML for the expected schema
    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },

    /// Connection target string is malformed
    #[error("Invalid connection target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Two endpoints share a key
    #[error("Duplicate endpoint key: {key}")]
    DuplicateEndpoint { key: String },

    /// Expected variable listed twice
    #[error("Duplicate variable name: {name}")]
    DuplicateVariable { name: String },

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
