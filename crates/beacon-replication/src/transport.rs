//! Peer transport seam
//!
//! The replication channel talks to peers through [`PeerTransport`] so
//! tests can swap HTTP for an in-memory recorder with injectable failures.

use crate::error::{ReplicationError, ReplicationResult};
use async_trait::async_trait;
use beacon_registry::{
    FullRegistryResponse, RegisterRequest, StatusOverrideRequest, StoreEvent, REPLICATION_HEADER,
};
use std::fmt::Debug;
use tracing::debug;

/// Outbound replication operations against a single peer
#[async_trait]
pub trait PeerTransport: Send + Sync + Debug {
    /// Replay one locally originated mutation against a peer
    async fn replicate(&self, endpoint: &str, event: &StoreEvent) -> ReplicationResult<()>;

    /// Fetch the peer's full registry view (startup sync)
    async fn fetch_full_registry(&self, endpoint: &str)
        -> ReplicationResult<FullRegistryResponse>;
}

/// HTTP transport speaking the same routes clients use, tagged with the
/// replication marker header
#[derive(Debug)]
pub struct HttpPeerTransport {
    client: reqwest::Client,
}

impl HttpPeerTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn check_status(endpoint: &str, status: reqwest::StatusCode) -> ReplicationResult<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(ReplicationError::RejectedByPeer {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

impl Default for HttpPeerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn replicate(&self, endpoint: &str, event: &StoreEvent) -> ReplicationResult<()> {
        match event {
            StoreEvent::Registered(lease) => {
                let url = format!("{}/registry/apps/{}", endpoint, lease.app_name());
                let body = RegisterRequest::from_lease(lease);
                let response = self
                    .client
                    .post(&url)
                    .header(REPLICATION_HEADER, "true")
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ReplicationError::unreachable(endpoint, e.to_string()))?;
                Self::check_status(endpoint, response.status())
            }
            StoreEvent::Renewed {
                app_name,
                instance_id,
            } => {
                let url = format!(
                    "{}/registry/apps/{}/{}/renew",
                    endpoint, app_name, instance_id
                );
                let response = self
                    .client
                    .put(&url)
                    .header(REPLICATION_HEADER, "true")
                    .send()
                    .await
                    .map_err(|e| ReplicationError::unreachable(endpoint, e.to_string()))?;
                // The peer may not know this lease yet (it will learn of it
                // from the register still in flight); a 404 renew is not a
                // peer failure.
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    debug!(%endpoint, app = %app_name, instance = %instance_id,
                        "peer has no lease for replicated renew");
                    return Ok(());
                }
                Self::check_status(endpoint, response.status())
            }
            StoreEvent::Cancelled {
                app_name,
                instance_id,
            }
            | StoreEvent::Evicted {
                app_name,
                instance_id,
            } => {
                let url = format!("{}/registry/apps/{}/{}", endpoint, app_name, instance_id);
                let response = self
                    .client
                    .delete(&url)
                    .header(REPLICATION_HEADER, "true")
                    .send()
                    .await
                    .map_err(|e| ReplicationError::unreachable(endpoint, e.to_string()))?;
                Self::check_status(endpoint, response.status())
            }
            StoreEvent::StatusChanged(lease) => {
                let url = format!(
                    "{}/registry/apps/{}/{}/status",
                    endpoint,
                    lease.app_name(),
                    lease.instance_id()
                );
                let body = StatusOverrideRequest {
                    status: lease.status,
                };
                let response = self
                    .client
                    .put(&url)
                    .header(REPLICATION_HEADER, "true")
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ReplicationError::unreachable(endpoint, e.to_string()))?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    debug!(%endpoint, app = %lease.app_name(), instance = %lease.instance_id(),
                        "peer has no lease for replicated status change");
                    return Ok(());
                }
                Self::check_status(endpoint, response.status())
            }
        }
    }

    async fn fetch_full_registry(
        &self,
        endpoint: &str,
    ) -> ReplicationResult<FullRegistryResponse> {
        let url = format!("{}/registry/apps", endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ReplicationError::unreachable(endpoint, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplicationError::RejectedByPeer {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ReplicationError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }
}

/// In-memory transport recording every delivery, with per-endpoint
/// injectable failures
#[derive(Debug, Default)]
pub struct InMemoryPeerTransport {
    sent: std::sync::Mutex<Vec<(String, StoreEvent)>>,
    failing: std::sync::Mutex<std::collections::HashSet<String>>,
    registries: std::sync::Mutex<std::collections::HashMap<String, FullRegistryResponse>>,
}

impl InMemoryPeerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call against `endpoint` fail until cleared
    pub fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().unwrap().insert(endpoint.to_string());
    }

    pub fn heal_endpoint(&self, endpoint: &str) {
        self.failing.lock().unwrap().remove(endpoint);
    }

    /// Seed the registry view served to `fetch_full_registry`
    pub fn set_registry(&self, endpoint: &str, registry: FullRegistryResponse) {
        self.registries
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), registry);
    }

    pub fn sent(&self) -> Vec<(String, StoreEvent)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, endpoint: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }

    fn is_failing(&self, endpoint: &str) -> bool {
        self.failing.lock().unwrap().contains(endpoint)
    }
}

#[async_trait]
impl PeerTransport for InMemoryPeerTransport {
    async fn replicate(&self, endpoint: &str, event: &StoreEvent) -> ReplicationResult<()> {
        if self.is_failing(endpoint) {
            return Err(ReplicationError::unreachable(endpoint, "injected failure"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((endpoint.to_string(), event.clone()));
        Ok(())
    }

    async fn fetch_full_registry(
        &self,
        endpoint: &str,
    ) -> ReplicationResult<FullRegistryResponse> {
        if self.is_failing(endpoint) {
            return Err(ReplicationError::unreachable(endpoint, "injected failure"));
        }
        self.registries
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| ReplicationError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: "no registry seeded".into(),
            })
    }
}
