//! Core error types

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from configuration loading and validation
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("failed to read config file {path}: {reason}")]
    ConfigRead { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    ConfigParse { path: String, reason: String },
}

impl Error {
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
