//! Startup registry sync
//!
//! A node joining an existing cluster pulls a full registry snapshot from
//! the first reachable peer before serving traffic, so it does not start
//! with an empty view and report every instance as gone.

use crate::error::{ReplicationError, ReplicationResult};
use crate::transport::PeerTransport;
use beacon_registry::LeaseStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Seed `store` from the first peer that answers.
///
/// Returns the number of leases restored. An empty peer list is a
/// single-node deployment and syncs nothing; if every peer fails the node
/// starts empty rather than refusing to start, per the caller's choice of
/// how to handle the error.
pub async fn sync_from_peers(
    store: &LeaseStore,
    peers: &[String],
    transport: &Arc<dyn PeerTransport>,
) -> ReplicationResult<usize> {
    if peers.is_empty() {
        return Ok(0);
    }

    for endpoint in peers {
        match transport.fetch_full_registry(endpoint).await {
            Ok(registry) => {
                let mut restored = 0usize;
                for lease in registry.into_leases() {
                    match store.restore(lease).await {
                        Ok(()) => restored += 1,
                        Err(error) => {
                            warn!(%endpoint, %error, "skipping invalid lease from peer sync");
                        }
                    }
                }
                info!(%endpoint, restored, "synced registry from peer");
                return Ok(restored);
            }
            Err(error) => {
                warn!(%endpoint, %error, "peer sync attempt failed");
            }
        }
    }

    Err(ReplicationError::SyncFailed {
        reason: format!("all {} peers unreachable", peers.len()),
    })
}
