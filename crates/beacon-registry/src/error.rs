//! Registry error types

use thiserror::Error;

/// Result type alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Registration with missing or malformed identity fields
    #[error("invalid identity: {field}: {reason}")]
    InvalidIdentity { field: String, reason: String },

    /// Malformed application name
    #[error("invalid application name '{name}': {reason}")]
    InvalidAppName { name: String, reason: String },

    /// Malformed instance ID
    #[error("invalid instance ID '{id}': {reason}")]
    InvalidInstanceId { id: String, reason: String },

    /// Lease duration outside accepted bounds
    #[error("invalid lease duration {duration_ms}ms (must be {min_ms}..={max_ms}ms)")]
    InvalidLeaseDuration {
        duration_ms: u64,
        min_ms: u64,
        max_ms: u64,
    },

    /// Registry is at its lease capacity
    #[error("registry full: {count} leases at limit {limit}")]
    RegistryFull { count: usize, limit: usize },

    /// Requested delta version predates the retention window
    #[error("delta version {since_version} predates retention (oldest available is {oldest_version}); full fetch required")]
    DeltaExpired {
        since_version: u64,
        oldest_version: u64,
    },
}

impl RegistryError {
    pub fn invalid_identity(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
