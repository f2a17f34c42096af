//! Periodic eviction sweep
//!
//! A single background task walks the store on a fixed interval, expiring
//! leases whose renewal clock has run out. The pass is all-or-nothing
//! under self-preservation: partial eviction during a suspected partition
//! would penalize instances based on sweep ordering, so a suppressed pass
//! evicts nothing. An allowed pass shuffles its candidates and stops at a
//! cap, so a backlog of stale leases drains over several passes instead of
//! deregistering a whole fleet at once.

use crate::instance::{AppName, InstanceId};
use crate::preservation::SelfPreservationMonitor;
use crate::store::LeaseStore;
use beacon_core::{RngProvider, SweepConfig, TimeProvider};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of one sweep pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Nothing was expired
    Idle,
    /// Self-preservation suppressed the whole pass
    Suppressed { candidates: usize },
    /// Candidates were evicted (possibly capped)
    Swept { candidates: usize, evicted: usize },
}

/// The eviction sweeper
pub struct EvictionSweeper {
    store: Arc<LeaseStore>,
    monitor: Arc<SelfPreservationMonitor>,
    time: Arc<dyn TimeProvider>,
    rng: Arc<dyn RngProvider>,
    config: SweepConfig,
}

impl EvictionSweeper {
    pub fn new(
        store: Arc<LeaseStore>,
        time: Arc<dyn TimeProvider>,
        rng: Arc<dyn RngProvider>,
        config: SweepConfig,
    ) -> Self {
        let monitor = store.monitor().clone();
        Self {
            store,
            monitor,
            time,
            rng,
            config,
        }
    }

    /// Spawn the sweep loop
    ///
    /// Single-flight by construction: the loop awaits each pass before
    /// sleeping again, so a pass never overlaps a prior unfinished one.
    pub fn start(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.time.sleep_ms(self.config.interval_ms) => {
                        self.run_once().await;
                    }
                    _ = shutdown.notified() => {
                        debug!("eviction sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Run one sweep pass
    pub async fn run_once(&self) -> SweepOutcome {
        let now_ms = self.time.now_ms();

        // evicted leases past retention have had their DELETE replicated;
        // physically drop them
        let purged = self.store.purge_evicted(self.config.evicted_retention_ms).await;
        if purged > 0 {
            debug!(purged, "purged evicted leases past retention");
        }

        let mut candidates = self.store.expired_candidates().await;
        if candidates.is_empty() {
            return SweepOutcome::Idle;
        }

        let total = self.store.lease_count().await;
        if !self.monitor.evictions_allowed(total, now_ms) {
            let stats = self.monitor.stats(total, now_ms);
            warn!(
                candidates = candidates.len(),
                expected_per_min = stats.expected_renewals_per_minute,
                actual_per_min = stats.actual_renewals_per_minute,
                "self-preservation active, skipping eviction pass"
            );
            return SweepOutcome::Suppressed {
                candidates: candidates.len(),
            };
        }

        // randomize so repeated capped passes don't always expire the same
        // applications first
        self.shuffle(&mut candidates);

        let cap = self.eviction_cap(total);
        let mut evicted = 0;
        for (app_name, instance_id) in candidates.iter().take(cap) {
            if self.store.evict_if_expired(app_name, instance_id).await {
                info!(app = %app_name, instance = %instance_id, "evicted expired lease");
                evicted += 1;
            }
        }

        SweepOutcome::Swept {
            candidates: candidates.len(),
            evicted,
        }
    }

    /// Per-pass eviction limit: a percentage of the registered population,
    /// but never zero so small registries still converge
    fn eviction_cap(&self, total_leases: usize) -> usize {
        ((total_leases * self.config.eviction_cap_percent as usize) / 100).max(1)
    }

    /// Fisher-Yates over the injected RNG
    fn shuffle(&self, candidates: &mut [(AppName, InstanceId)]) {
        for i in (1..candidates.len()).rev() {
            let j = self.rng.gen_range(0, (i + 1) as u64) as usize;
            candidates.swap(i, j);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceIdentity, InstanceStatus};
    use beacon_core::{MockClock, PreservationConfig, SeededRngProvider};
    use std::collections::HashMap;

    const DURATION_MS: u64 = 90_000;

    fn test_identity(app: &str, n: u32) -> InstanceIdentity {
        InstanceIdentity {
            instance_id: InstanceId::new(format!("host-{}:8080", n)).unwrap(),
            app_name: AppName::new(app).unwrap(),
            hostname: format!("host-{}", n),
            ip_addr: format!("10.0.0.{}", n),
            port: 8080,
            secure_port: None,
            metadata: HashMap::new(),
        }
    }

    fn app(name: &str) -> AppName {
        AppName::new(name).unwrap()
    }

    fn instance(n: u32) -> InstanceId {
        InstanceId::new(format!("host-{}:8080", n)).unwrap()
    }

    struct Fixture {
        clock: Arc<MockClock>,
        store: Arc<LeaseStore>,
        sweeper: EvictionSweeper,
    }

    fn fixture(preservation_enabled: bool) -> Fixture {
        let clock = Arc::new(MockClock::new(1000));
        let monitor = Arc::new(SelfPreservationMonitor::new(
            &PreservationConfig {
                enabled: preservation_enabled,
                threshold: 0.85,
            },
            30_000,
        ));
        let store = Arc::new(LeaseStore::new(clock.clone(), monitor, 180_000, None));
        let sweeper = EvictionSweeper::new(
            store.clone(),
            clock.clone(),
            Arc::new(SeededRngProvider::new(7)),
            SweepConfig::default(),
        );
        Fixture {
            clock,
            store,
            sweeper,
        }
    }

    /// Renew every lease of the fixture enough to hold the expected rate
    async fn renew_at_expected_rate(f: &Fixture, instances: &[u32], minutes: u64) {
        for _ in 0..(minutes * 2) {
            f.clock.advance(30_000);
            for n in instances {
                f.store.renew(&app("orders"), &instance(*n)).await;
            }
        }
    }

    #[tokio::test]
    async fn test_idle_when_nothing_expired() {
        let f = fixture(true);
        f.store
            .register(test_identity("orders", 1), InstanceStatus::Up, DURATION_MS)
            .await
            .unwrap();

        assert_eq!(f.sweeper.run_once().await, SweepOutcome::Idle);
    }

    #[tokio::test]
    async fn test_stale_lease_evicted_when_rate_healthy() {
        let f = fixture(true);
        f.store
            .register(test_identity("orders", 1), InstanceStatus::Up, DURATION_MS)
            .await
            .unwrap();
        f.store
            .register(test_identity("orders", 2), InstanceStatus::Up, DURATION_MS)
            .await
            .unwrap();

        // instance 2 keeps renewing, instance 1 goes silent; with one of
        // two leases renewing the rate is 50% of expected, which would
        // suppress, so renew instance 2 twice per interval to hold the
        // overall rate up
        for _ in 0..4 {
            f.clock.advance(30_000);
            f.store.renew(&app("orders"), &instance(2)).await;
            f.store.renew(&app("orders"), &instance(2)).await;
        }

        // instance 1 is now 120s stale (> 90s duration)
        let outcome = f.sweeper.run_once().await;
        assert_eq!(
            outcome,
            SweepOutcome::Swept {
                candidates: 1,
                evicted: 1
            }
        );
        let leases = f.store.snapshot_application(&app("orders")).await.unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].instance_id(), &instance(2));
    }

    #[tokio::test]
    async fn test_renewed_lease_survives_next_sweep() {
        let f = fixture(false);
        f.store
            .register(test_identity("orders", 1), InstanceStatus::Up, DURATION_MS)
            .await
            .unwrap();

        // renew just before expiry, then sweep past the original deadline
        f.clock.advance(89_000);
        assert!(f.store.renew(&app("orders"), &instance(1)).await);
        f.clock.advance(10_000);

        assert_eq!(f.sweeper.run_once().await, SweepOutcome::Idle);
        assert!(f.store.snapshot_application(&app("orders")).await.is_some());
    }

    #[tokio::test]
    async fn test_mass_silence_suppresses_whole_pass() {
        let f = fixture(true);
        for n in 1..=4 {
            f.store
                .register(test_identity("orders", n), InstanceStatus::Up, DURATION_MS)
                .await
                .unwrap();
        }

        // hold a healthy rate for a while, then everyone goes silent
        renew_at_expected_rate(&f, &[1, 2, 3, 4], 2).await;
        f.clock.advance(91_001);

        let outcome = f.sweeper.run_once().await;
        assert_eq!(outcome, SweepOutcome::Suppressed { candidates: 4 });

        // nothing evicted, all four still discoverable
        let leases = f.store.snapshot_application(&app("orders")).await.unwrap();
        assert_eq!(leases.len(), 4);
    }

    #[tokio::test]
    async fn test_recovery_evicts_only_still_stale() {
        let f = fixture(true);
        f.store
            .register(test_identity("orders", 1), InstanceStatus::Up, DURATION_MS)
            .await
            .unwrap();
        f.store
            .register(test_identity("orders", 2), InstanceStatus::Up, DURATION_MS)
            .await
            .unwrap();

        // both go silent long enough to expire; rate collapses
        f.clock.advance(91_001);
        assert_eq!(
            f.sweeper.run_once().await,
            SweepOutcome::Suppressed { candidates: 2 }
        );

        // instance 2 comes back and renews hard enough to restore the
        // aggregate rate (2 leases -> expected 4/min, threshold 3.4)
        for _ in 0..4 {
            f.store.renew(&app("orders"), &instance(2)).await;
        }

        let outcome = f.sweeper.run_once().await;
        assert_eq!(
            outcome,
            SweepOutcome::Swept {
                candidates: 1,
                evicted: 1
            }
        );

        let leases = f.store.snapshot_application(&app("orders")).await.unwrap();
        assert_eq!(leases.len(), 1);
        assert_eq!(leases[0].instance_id(), &instance(2));
    }

    #[tokio::test]
    async fn test_eviction_capped_per_pass() {
        let f = fixture(false);
        for n in 1..=20 {
            f.store
                .register(test_identity("orders", n), InstanceStatus::Up, DURATION_MS)
                .await
                .unwrap();
        }

        // all 20 expire; default cap is 15% -> 3 per pass
        f.clock.advance(91_001);
        let outcome = f.sweeper.run_once().await;
        assert_eq!(
            outcome,
            SweepOutcome::Swept {
                candidates: 20,
                evicted: 3
            }
        );

        let leases = f.store.snapshot_application(&app("orders")).await.unwrap();
        assert_eq!(leases.len(), 17);
    }

    #[tokio::test]
    async fn test_cap_never_zero() {
        let f = fixture(false);
        f.store
            .register(test_identity("orders", 1), InstanceStatus::Up, DURATION_MS)
            .await
            .unwrap();

        // 15% of 1 lease rounds to zero; the floor of one still applies
        f.clock.advance(91_001);
        let outcome = f.sweeper.run_once().await;
        assert_eq!(
            outcome,
            SweepOutcome::Swept {
                candidates: 1,
                evicted: 1
            }
        );
    }

    #[tokio::test]
    async fn test_sweep_loop_starts_and_stops() {
        use beacon_core::WallClockTime;

        // correctness of a pass is covered by the run_once tests; this
        // only exercises loop start/shutdown against the real clock
        let clock = Arc::new(WallClockTime::new());
        let monitor = Arc::new(SelfPreservationMonitor::new(
            &PreservationConfig::default(),
            30_000,
        ));
        let store = Arc::new(LeaseStore::new(
            clock.clone(),
            monitor,
            180_000,
            None,
        ));
        let sweeper = Arc::new(EvictionSweeper::new(
            store,
            clock,
            Arc::new(SeededRngProvider::new(7)),
            SweepConfig {
                interval_ms: 10,
                ..SweepConfig::default()
            },
        ));

        let shutdown = Arc::new(Notify::new());
        let handle = sweeper.start(shutdown.clone());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.notify_waiters();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop on shutdown")
            .expect("sweeper task panicked");
    }
}
