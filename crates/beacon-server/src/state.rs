//! Shared server state

use beacon_registry::LeaseStore;
use beacon_replication::ReplicationChannel;
use std::sync::Arc;

/// State handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LeaseStore>,
    /// None on single-node deployments
    pub replication: Option<Arc<ReplicationChannel>>,
    pub node_id: String,
    /// Lease duration applied when a registration does not name one
    pub default_duration_ms: u64,
}

impl AppState {
    pub fn new(
        store: Arc<LeaseStore>,
        replication: Option<Arc<ReplicationChannel>>,
        node_id: impl Into<String>,
        default_duration_ms: u64,
    ) -> Self {
        Self {
            store,
            replication,
            node_id: node_id.into(),
            default_duration_ms,
        }
    }
}
