//! The lease store
//!
//! Authoritative in-memory mapping of application -> instance -> lease.
//! A single write lock covers both the lease maps and the delta queue so
//! delta version order always agrees with map state, and snapshot reads
//! clone under the read lock so a reader never observes a lease
//! mid-mutation.
//!
//! Every mutation appends a delta entry and, for locally originated
//! mutations, emits a [`StoreEvent`] for the replication channel.
//! Replicated mutations are applied through the `apply_replicated_*`
//! methods, which skip event emission so a mutation is never re-replicated
//! outward by the receiver.

use crate::delta::{DeltaAction, DeltaEntry, DeltaQueue};
use crate::error::{RegistryError, RegistryResult};
use crate::instance::{AppName, InstanceId, InstanceIdentity, InstanceStatus, Lease};
use crate::preservation::SelfPreservationMonitor;
use beacon_core::constants::{
    LEASE_DURATION_MS_MAX, LEASE_DURATION_MS_MIN, REGISTRY_LEASES_COUNT_MAX,
};
use beacon_core::TimeProvider;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// A locally originated registry mutation, handed to the replication
/// channel for peer fan-out
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A lease was created or overwritten (snapshot carries timestamps so
    /// peers can resolve conflicts last-writer-wins)
    Registered(Lease),
    /// A lease was renewed
    Renewed {
        app_name: AppName,
        instance_id: InstanceId,
    },
    /// A lease was cancelled by its owner
    Cancelled {
        app_name: AppName,
        instance_id: InstanceId,
    },
    /// A lease was expired by the sweeper
    Evicted {
        app_name: AppName,
        instance_id: InstanceId,
    },
    /// A status override was set or cleared
    StatusChanged(Lease),
}

struct StoreInner {
    apps: HashMap<AppName, HashMap<InstanceId, Lease>>,
    deltas: DeltaQueue,
}

/// Thread-safe lease store with snapshot-isolated reads
pub struct LeaseStore {
    inner: RwLock<StoreInner>,
    time: Arc<dyn TimeProvider>,
    monitor: Arc<SelfPreservationMonitor>,
    /// Replication tap; None for stores that do not replicate (tests,
    /// single-node deployments)
    events: Option<mpsc::UnboundedSender<StoreEvent>>,
}

impl LeaseStore {
    pub fn new(
        time: Arc<dyn TimeProvider>,
        monitor: Arc<SelfPreservationMonitor>,
        delta_retention_ms: u64,
        events: Option<mpsc::UnboundedSender<StoreEvent>>,
    ) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                apps: HashMap::new(),
                deltas: DeltaQueue::new(delta_retention_ms),
            }),
            time,
            monitor,
            events,
        }
    }

    fn emit(&self, event: StoreEvent) {
        if let Some(tx) = &self.events {
            // fan-out failure must never surface to the mutating caller
            let _ = tx.send(event);
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Register an instance, overwriting any existing lease for the same
    /// instance ID (idempotent upsert; re-registration resets the renewal
    /// clock and the registration timestamp)
    pub async fn register(
        &self,
        identity: InstanceIdentity,
        status: InstanceStatus,
        duration_ms: u64,
    ) -> RegistryResult<Lease> {
        identity.validate()?;
        validate_duration(duration_ms)?;

        let now_ms = self.time.now_ms();
        let lease = Lease::new(identity, status, duration_ms, now_ms);

        self.upsert(lease.clone(), now_ms).await?;
        self.emit(StoreEvent::Registered(lease.clone()));

        info!(
            app = %lease.app_name(),
            instance = %lease.instance_id(),
            duration_ms = lease.duration_ms,
            "registered instance"
        );
        Ok(lease)
    }

    /// Apply a register replicated from a peer
    ///
    /// Conflict resolution is last-writer-wins on the registration
    /// timestamp: an older replicated snapshot never clobbers a newer
    /// local lease.
    pub async fn apply_replicated_register(&self, lease: Lease) -> RegistryResult<()> {
        lease.identity.validate()?;
        validate_duration(lease.duration_ms)?;

        let now_ms = self.time.now_ms();
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .apps
            .get(lease.app_name())
            .and_then(|instances| instances.get(lease.instance_id()))
        {
            if existing.registered_at_ms > lease.registered_at_ms {
                debug!(
                    app = %lease.app_name(),
                    instance = %lease.instance_id(),
                    "dropping stale replicated register"
                );
                return Ok(());
            }
        }

        Self::upsert_locked(&mut inner, lease, now_ms)?;
        Ok(())
    }

    /// Renew a lease, advancing its renewal clock
    ///
    /// Returns false when no matching lease exists; the caller must
    /// translate that into a re-registration requirement, never a silent
    /// no-op.
    pub async fn renew(&self, app_name: &AppName, instance_id: &InstanceId) -> bool {
        let renewed = self.renew_inner(app_name, instance_id).await;
        if renewed {
            self.emit(StoreEvent::Renewed {
                app_name: app_name.clone(),
                instance_id: instance_id.clone(),
            });
        }
        renewed
    }

    /// Apply a renew replicated from a peer (not re-replicated)
    pub async fn apply_replicated_renew(
        &self,
        app_name: &AppName,
        instance_id: &InstanceId,
    ) -> bool {
        self.renew_inner(app_name, instance_id).await
    }

    async fn renew_inner(&self, app_name: &AppName, instance_id: &InstanceId) -> bool {
        let now_ms = self.time.now_ms();
        let mut inner = self.inner.write().await;

        let Some(lease) = inner
            .apps
            .get_mut(app_name)
            .and_then(|instances| instances.get_mut(instance_id))
        else {
            debug!(app = %app_name, instance = %instance_id, "renew for unknown lease");
            return false;
        };

        lease.renew(now_ms);
        let snapshot = lease.clone();
        inner.deltas.append(DeltaAction::Modify, snapshot, now_ms);

        self.monitor.record_renewal(now_ms);
        true
    }

    /// Cancel a lease, removing it immediately
    ///
    /// Returns false when no matching lease existed (callers treat cancel
    /// as idempotent).
    pub async fn cancel(&self, app_name: &AppName, instance_id: &InstanceId) -> bool {
        let cancelled = self.remove(app_name, instance_id).await;
        if cancelled {
            self.emit(StoreEvent::Cancelled {
                app_name: app_name.clone(),
                instance_id: instance_id.clone(),
            });
            info!(app = %app_name, instance = %instance_id, "cancelled lease");
        }
        cancelled
    }

    /// Apply a cancel replicated from a peer (not re-replicated)
    pub async fn apply_replicated_cancel(
        &self,
        app_name: &AppName,
        instance_id: &InstanceId,
    ) -> bool {
        self.remove(app_name, instance_id).await
    }

    async fn remove(&self, app_name: &AppName, instance_id: &InstanceId) -> bool {
        let now_ms = self.time.now_ms();
        let mut inner = self.inner.write().await;

        let Some(instances) = inner.apps.get_mut(app_name) else {
            return false;
        };
        let Some(lease) = instances.remove(instance_id) else {
            return false;
        };
        if instances.is_empty() {
            inner.apps.remove(app_name);
        }

        inner.deltas.append(DeltaAction::Delete, lease, now_ms);
        true
    }

    /// Override an instance's status (e.g. take it OUT_OF_SERVICE without
    /// deregistering)
    ///
    /// Returns the updated lease, or None when no matching lease exists.
    pub async fn set_status(
        &self,
        app_name: &AppName,
        instance_id: &InstanceId,
        status: InstanceStatus,
    ) -> Option<Lease> {
        let lease = self.set_status_inner(app_name, instance_id, status).await?;
        self.emit(StoreEvent::StatusChanged(lease.clone()));
        info!(app = %app_name, instance = %instance_id, status = %status, "status override");
        Some(lease)
    }

    /// Apply a status change replicated from a peer (not re-replicated)
    pub async fn apply_replicated_status(
        &self,
        app_name: &AppName,
        instance_id: &InstanceId,
        status: InstanceStatus,
    ) -> Option<Lease> {
        self.set_status_inner(app_name, instance_id, status).await
    }

    async fn set_status_inner(
        &self,
        app_name: &AppName,
        instance_id: &InstanceId,
        status: InstanceStatus,
    ) -> Option<Lease> {
        let now_ms = self.time.now_ms();
        let mut inner = self.inner.write().await;

        let lease = inner
            .apps
            .get_mut(app_name)?
            .get_mut(instance_id)?;
        lease.status = status;
        let snapshot = lease.clone();

        inner
            .deltas
            .append(DeltaAction::Modify, snapshot.clone(), now_ms);
        Some(snapshot)
    }

    /// Seed a lease during startup peer sync, preserving its timestamps
    ///
    /// Appends an ADD delta (so a fresh node can serve incremental
    /// fetches) but emits no replication event: the peer we synced from
    /// already has this state.
    pub async fn restore(&self, lease: Lease) -> RegistryResult<()> {
        lease.identity.validate()?;
        let now_ms = self.time.now_ms();
        let mut inner = self.inner.write().await;
        Self::upsert_locked(&mut inner, lease, now_ms)?;
        Ok(())
    }

    async fn upsert(&self, lease: Lease, now_ms: u64) -> RegistryResult<()> {
        let mut inner = self.inner.write().await;
        Self::upsert_locked(&mut inner, lease, now_ms)
    }

    fn upsert_locked(inner: &mut StoreInner, lease: Lease, now_ms: u64) -> RegistryResult<()> {
        let total: usize = inner.apps.values().map(|i| i.len()).sum();
        let instances = inner.apps.entry(lease.app_name().clone()).or_default();

        let action = if instances.contains_key(lease.instance_id()) {
            DeltaAction::Modify
        } else {
            if total >= REGISTRY_LEASES_COUNT_MAX {
                return Err(RegistryError::RegistryFull {
                    count: total,
                    limit: REGISTRY_LEASES_COUNT_MAX,
                });
            }
            DeltaAction::Add
        };

        instances.insert(lease.instance_id().clone(), lease.clone());
        inner.deltas.append(action, lease, now_ms);
        Ok(())
    }

    // =========================================================================
    // Eviction support
    // =========================================================================

    /// Leases whose renewal clock has run out, as (app, instance) pairs
    pub async fn expired_candidates(&self) -> Vec<(AppName, InstanceId)> {
        let now_ms = self.time.now_ms();
        let inner = self.inner.read().await;
        inner
            .apps
            .iter()
            .flat_map(|(app, instances)| {
                instances
                    .values()
                    .filter(|lease| !lease.is_evicted() && lease.is_expired(now_ms))
                    .map(|lease| (app.clone(), lease.instance_id().clone()))
            })
            .collect()
    }

    /// Evict a lease if (and only if) it is still expired
    ///
    /// The re-check under the write lock is what guarantees a renew that
    /// raced the sweep wins: a lease renewed after candidate collection is
    /// no longer expired here and survives the pass.
    pub async fn evict_if_expired(
        &self,
        app_name: &AppName,
        instance_id: &InstanceId,
    ) -> bool {
        let now_ms = self.time.now_ms();
        let mut inner = self.inner.write().await;

        let Some(lease) = inner
            .apps
            .get_mut(app_name)
            .and_then(|instances| instances.get_mut(instance_id))
        else {
            return false;
        };

        if lease.is_evicted() || !lease.is_expired(now_ms) {
            return false;
        }

        lease.mark_evicted(now_ms);
        let snapshot = lease.clone();
        inner.deltas.append(DeltaAction::Delete, snapshot, now_ms);
        drop(inner);

        self.emit(StoreEvent::Evicted {
            app_name: app_name.clone(),
            instance_id: instance_id.clone(),
        });
        true
    }

    /// Physically remove evicted leases older than the retention window
    ///
    /// Returns the number purged. Runs after their DELETEs have been
    /// handed to the replication channel.
    pub async fn purge_evicted(&self, retention_ms: u64) -> usize {
        let now_ms = self.time.now_ms();
        let cutoff = now_ms.saturating_sub(retention_ms);
        let mut inner = self.inner.write().await;

        let mut purged = 0;
        inner.apps.retain(|_, instances| {
            instances.retain(|_, lease| {
                let stale = matches!(lease.evicted_at_ms, Some(at) if at < cutoff);
                if stale {
                    purged += 1;
                }
                !stale
            });
            !instances.is_empty()
        });

        purged
    }

    // =========================================================================
    // Reads (snapshot-isolated)
    // =========================================================================

    /// Leases of one application, or None when the application is unknown
    ///
    /// Evicted leases are excluded. Results are ordered by instance ID for
    /// stable output.
    pub async fn snapshot_application(&self, app_name: &AppName) -> Option<Vec<Lease>> {
        let inner = self.inner.read().await;
        let instances = inner.apps.get(app_name)?;

        let mut leases: Vec<Lease> = instances
            .values()
            .filter(|lease| !lease.is_evicted())
            .cloned()
            .collect();
        if leases.is_empty() {
            return None;
        }
        leases.sort_by(|a, b| a.instance_id().cmp(b.instance_id()));
        Some(leases)
    }

    /// Full registry view: application -> leases, plus the delta version
    /// the view corresponds to
    pub async fn snapshot_full(&self) -> (BTreeMap<AppName, Vec<Lease>>, u64) {
        let inner = self.inner.read().await;

        let mut apps = BTreeMap::new();
        for (app, instances) in &inner.apps {
            let mut leases: Vec<Lease> = instances
                .values()
                .filter(|lease| !lease.is_evicted())
                .cloned()
                .collect();
            if leases.is_empty() {
                continue;
            }
            leases.sort_by(|a, b| a.instance_id().cmp(b.instance_id()));
            apps.insert(app.clone(), leases);
        }

        (apps, inner.deltas.latest_version())
    }

    /// Delta entries newer than `since_version`, plus the latest version
    ///
    /// Fails with [`RegistryError::DeltaExpired`] when the requested
    /// version predates the retention window.
    pub async fn deltas_since(
        &self,
        since_version: u64,
    ) -> RegistryResult<(Vec<DeltaEntry>, u64)> {
        let now_ms = self.time.now_ms();
        let mut inner = self.inner.write().await;
        let entries = inner.deltas.entries_since(since_version, now_ms)?;
        Ok((entries, inner.deltas.latest_version()))
    }

    /// Version of the most recent delta entry
    pub async fn delta_version(&self) -> u64 {
        self.inner.read().await.deltas.latest_version()
    }

    /// Number of live (non-evicted) leases across all applications
    pub async fn lease_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .apps
            .values()
            .flat_map(|instances| instances.values())
            .filter(|lease| !lease.is_evicted())
            .count()
    }

    /// The self-preservation monitor fed by this store's renewals
    pub fn monitor(&self) -> &Arc<SelfPreservationMonitor> {
        &self.monitor
    }

    /// The store's time source
    pub fn time(&self) -> &Arc<dyn TimeProvider> {
        &self.time
    }
}

fn validate_duration(duration_ms: u64) -> RegistryResult<()> {
    if !(LEASE_DURATION_MS_MIN..=LEASE_DURATION_MS_MAX).contains(&duration_ms) {
        return Err(RegistryError::InvalidLeaseDuration {
            duration_ms,
            min_ms: LEASE_DURATION_MS_MIN,
            max_ms: LEASE_DURATION_MS_MAX,
        });
    }
    Ok(())
}
