//! Replication error types

use thiserror::Error;

/// Result type alias for replication operations
pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

/// Replication-specific errors
///
/// None of these ever surface to the client whose mutation triggered the
/// fan-out; they are logged and retried.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Peer could not be reached at the transport level
    #[error("peer {endpoint} unreachable: {reason}")]
    PeerUnreachable { endpoint: String, reason: String },

    /// Peer answered with a non-success status
    #[error("peer {endpoint} rejected replication with status {status}")]
    RejectedByPeer { endpoint: String, status: u16 },

    /// Peer response could not be decoded
    #[error("peer {endpoint} sent an undecodable response: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    /// No peer could serve the startup registry sync
    #[error("startup sync failed: {reason}")]
    SyncFailed { reason: String },
}

impl ReplicationError {
    pub fn unreachable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PeerUnreachable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}
