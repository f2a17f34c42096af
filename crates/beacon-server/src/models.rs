//! API response models

use beacon_registry::PreservationStats;
use beacon_replication::PeerStats;
use serde::{Deserialize, Serialize};

/// Standard error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str, id: &str) -> Self {
        Self::new(
            "not_found",
            format!("{} '{}' not found", resource, id),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new("gone", message)
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Node status, `GET /registry/status`
#[derive(Debug, Serialize)]
pub struct RegistryStatusResponse {
    pub node_id: String,
    pub version: String,
    pub lease_count: usize,
    pub delta_version: u64,
    pub preservation: PreservationStats,
    pub peers: Vec<PeerStats>,
    pub replication_retry_queue_len: usize,
}
