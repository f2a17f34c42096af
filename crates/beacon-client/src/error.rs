//! Client error types

use thiserror::Error;

/// Result type alias for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors talking to a registry node
#[derive(Error, Debug)]
pub enum ClientError {
    /// Node could not be reached at the transport level
    #[error("registry {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// Node answered with a non-success status
    #[error("registry {endpoint} answered with status {status}")]
    Rejected { endpoint: String, status: u16 },

    /// Node response could not be decoded
    #[error("registry {endpoint} sent an undecodable response: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

impl ClientError {
    pub fn unreachable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}
