//! Client-side registry cache
//!
//! Local view of the registry, kept close to fresh by the refresher.
//! Reads never block on the network: lookups answer from whatever the
//! cache holds, even when it is stale (availability over freshness).

use beacon_registry::{AppName, DeltaAction, DeltaEntry, FullRegistryResponse, InstanceId, Lease};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

struct CacheInner {
    apps: HashMap<AppName, HashMap<InstanceId, Lease>>,
    /// Delta version this view corresponds to; 0 before the first sync
    version: u64,
    last_sync_ms: u64,
}

/// Thread-safe local registry view
pub struct ClientCache {
    inner: RwLock<CacheInner>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                apps: HashMap::new(),
                version: 0,
                last_sync_ms: 0,
            }),
        }
    }

    /// Replace the whole view with a full fetch result
    pub fn apply_full(&self, registry: FullRegistryResponse, now_ms: u64) {
        let mut inner = self.inner.write().unwrap();
        inner.apps.clear();
        for (app_name, leases) in registry.applications {
            let instances = inner.apps.entry(app_name).or_default();
            for lease in leases {
                instances.insert(lease.instance_id().clone(), lease);
            }
        }
        inner.version = registry.version;
        inner.last_sync_ms = now_ms;
        debug!(version = inner.version, "cache replaced from full fetch");
    }

    /// Apply delta entries in version order on top of the current view
    pub fn apply_deltas(&self, deltas: &[DeltaEntry], version: u64, now_ms: u64) {
        let mut inner = self.inner.write().unwrap();
        for entry in deltas {
            let app_name = entry.lease.app_name().clone();
            let instance_id = entry.lease.instance_id().clone();
            match entry.action {
                DeltaAction::Add | DeltaAction::Modify => {
                    inner
                        .apps
                        .entry(app_name)
                        .or_default()
                        .insert(instance_id, entry.lease.clone());
                }
                DeltaAction::Delete => {
                    if let Some(instances) = inner.apps.get_mut(&app_name) {
                        instances.remove(&instance_id);
                        if instances.is_empty() {
                            inner.apps.remove(&app_name);
                        }
                    }
                }
            }
        }
        inner.version = version;
        inner.last_sync_ms = now_ms;
        debug!(
            applied = deltas.len(),
            version, "cache advanced from delta fetch"
        );
    }

    /// All cached instances of an application; empty when unknown
    pub fn instances_of(&self, app_name: &AppName) -> Vec<Lease> {
        let inner = self.inner.read().unwrap();
        let mut leases: Vec<Lease> = inner
            .apps
            .get(app_name)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default();
        leases.sort_by(|a, b| a.instance_id().cmp(b.instance_id()));
        leases
    }

    /// Cached instances of an application currently marked UP
    pub fn up_instances_of(&self, app_name: &AppName) -> Vec<Lease> {
        self.instances_of(app_name)
            .into_iter()
            .filter(|lease| lease.status.is_up())
            .collect()
    }

    /// Application names currently cached, sorted
    pub fn application_names(&self) -> Vec<AppName> {
        let inner = self.inner.read().unwrap();
        let mut names: Vec<AppName> = inner.apps.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delta version the view corresponds to (0 before the first sync)
    pub fn version(&self) -> u64 {
        self.inner.read().unwrap().version
    }

    pub fn last_sync_ms(&self) -> u64 {
        self.inner.read().unwrap().last_sync_ms
    }

    /// Whether the view is older than `max_age_ms`
    pub fn is_stale(&self, now_ms: u64, max_age_ms: u64) -> bool {
        let inner = self.inner.read().unwrap();
        now_ms.saturating_sub(inner.last_sync_ms) > max_age_ms
    }
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new()
    }
}
