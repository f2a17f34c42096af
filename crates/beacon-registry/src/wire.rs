//! Transport-agnostic request/response shapes for the registry API
//!
//! Shared by the server, the replication channel, and the client cache so
//! all three speak the same JSON. Replication reuses the client-facing
//! shapes; a replicated mutation is distinguished only by the marker
//! header, which receivers use to avoid re-replicating it outward.

use crate::delta::DeltaEntry;
use crate::instance::{AppName, InstanceIdentity, InstanceStatus, Lease};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Header marking a request as peer replication rather than client traffic
pub const REPLICATION_HEADER: &str = "x-beacon-replicated";

/// Body of `POST /registry/apps/{app}`
///
/// Client registrations send identity (+ optionally status and duration).
/// Replicated registers additionally carry the originating lease's
/// timestamps so the receiver can resolve conflicts last-writer-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub identity: InstanceIdentity,
    #[serde(default)]
    pub status: InstanceStatus,
    /// Lease duration; the node default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Registration timestamp (replication only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at_ms: Option<u64>,
    /// Last renewal timestamp (replication only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_renewal_ms: Option<u64>,
}

impl RegisterRequest {
    /// Build the replication form of a register, carrying lease timestamps
    pub fn from_lease(lease: &Lease) -> Self {
        Self {
            identity: lease.identity.clone(),
            status: lease.status,
            duration_ms: Some(lease.duration_ms),
            registered_at_ms: Some(lease.registered_at_ms),
            last_renewal_ms: Some(lease.last_renewal_ms),
        }
    }
}

/// Body of `PUT /registry/apps/{app}/{instance}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOverrideRequest {
    pub status: InstanceStatus,
}

/// Response of `GET /registry/apps/{app}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationResponse {
    pub name: AppName,
    pub leases: Vec<Lease>,
}

/// Response of `GET /registry/apps`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullRegistryResponse {
    pub applications: BTreeMap<AppName, Vec<Lease>>,
    /// Delta version this view corresponds to
    pub version: u64,
}

impl FullRegistryResponse {
    /// Flatten into individual leases (startup peer sync)
    pub fn into_leases(self) -> Vec<Lease> {
        self.applications
            .into_values()
            .flatten()
            .collect()
    }
}

/// Response of `GET /registry/delta?since=N`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaResponse {
    pub deltas: Vec<DeltaEntry>,
    /// Latest version after applying the returned deltas
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceId;
    use std::collections::HashMap;

    fn test_lease() -> Lease {
        let identity = InstanceIdentity {
            instance_id: InstanceId::new("host-1:8080").unwrap(),
            app_name: AppName::new("orders").unwrap(),
            hostname: "host-1".into(),
            ip_addr: "10.0.0.1".into(),
            port: 8080,
            secure_port: None,
            metadata: HashMap::new(),
        };
        Lease::new(identity, InstanceStatus::Up, 90_000, 1000)
    }

    #[test]
    fn test_register_request_defaults() {
        let json = r#"{
            "identity": {
                "instance_id": "host-1:8080",
                "app_name": "ORDERS",
                "hostname": "host-1",
                "ip_addr": "10.0.0.1",
                "port": 8080
            }
        }"#;
        let req: RegisterRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.status, InstanceStatus::Up);
        assert!(req.duration_ms.is_none());
        assert!(req.registered_at_ms.is_none());
    }

    #[test]
    fn test_replication_form_carries_timestamps() {
        let lease = test_lease();
        let req = RegisterRequest::from_lease(&lease);
        assert_eq!(req.registered_at_ms, Some(1000));
        assert_eq!(req.last_renewal_ms, Some(1000));
        assert_eq!(req.duration_ms, Some(90_000));
    }

    #[test]
    fn test_full_registry_flatten() {
        let mut applications = BTreeMap::new();
        applications.insert(AppName::new("orders").unwrap(), vec![test_lease()]);
        let response = FullRegistryResponse {
            applications,
            version: 7,
        };
        assert_eq!(response.into_leases().len(), 1);
    }
}
