//! Self-preservation monitor
//!
//! Compares the observed renewal rate against the rate the current lease
//! population should produce. When renewals collapse below a threshold
//! fraction of the expected rate, eviction is suppressed: a mass renewal
//! drop looks the same whether instances died or a partition cut them off,
//! and this registry chooses availability. This is a heuristic, not a
//! partition proof; suppressing eviction during a genuine mass shutdown is
//! an accepted tradeoff.

use beacon_core::constants::RENEWAL_WINDOW_MS;
use beacon_core::PreservationConfig;
use std::sync::Mutex;

/// Bucket width of the sliding renewal window (10 sec)
const RENEWAL_BUCKET_MS: u64 = 10 * 1000;

/// Sliding count of renewals over the last minute, bucketed so memory is
/// bounded regardless of renewal volume
#[derive(Debug, Default)]
struct RenewalWindow {
    /// (bucket start ms, count), oldest first
    buckets: Vec<(u64, u64)>,
}

impl RenewalWindow {
    fn record(&mut self, now_ms: u64) {
        let bucket_start = now_ms - (now_ms % RENEWAL_BUCKET_MS);

        match self.buckets.last_mut() {
            Some((start, count)) if *start == bucket_start => *count += 1,
            _ => self.buckets.push((bucket_start, 1)),
        }

        self.prune(now_ms);
    }

    fn count_in_window(&mut self, now_ms: u64) -> u64 {
        self.prune(now_ms);
        self.buckets.iter().map(|(_, count)| count).sum()
    }

    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(RENEWAL_WINDOW_MS);
        self.buckets.retain(|(start, _)| *start + RENEWAL_BUCKET_MS > cutoff);
    }
}

/// Snapshot of monitor state for the status surface
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PreservationStats {
    pub enabled: bool,
    pub threshold: f64,
    pub expected_renewals_per_minute: u64,
    pub actual_renewals_per_minute: u64,
    /// True when eviction is currently suppressed
    pub active: bool,
}

/// Tracks expected vs observed renewal rate and gates eviction
///
/// Owns the process-wide renewal counter; the lease store records every
/// successful renewal here.
#[derive(Debug)]
pub struct SelfPreservationMonitor {
    enabled: bool,
    threshold: f64,
    /// Expected interval between renewals of a single lease
    renewal_interval_ms: u64,
    window: Mutex<RenewalWindow>,
}

impl SelfPreservationMonitor {
    pub fn new(config: &PreservationConfig, renewal_interval_ms: u64) -> Self {
        Self {
            enabled: config.enabled,
            threshold: config.threshold,
            renewal_interval_ms,
            window: Mutex::new(RenewalWindow::default()),
        }
    }

    /// Record one successful renewal
    pub fn record_renewal(&self, now_ms: u64) {
        self.window.lock().expect("renewal window lock").record(now_ms);
    }

    /// Renewals the current lease population should produce per minute
    pub fn expected_renewals_per_minute(&self, lease_count: usize) -> u64 {
        (lease_count as u64) * (RENEWAL_WINDOW_MS / self.renewal_interval_ms)
    }

    /// Renewals actually observed over the sliding window
    pub fn actual_renewals_per_minute(&self, now_ms: u64) -> u64 {
        self.window
            .lock()
            .expect("renewal window lock")
            .count_in_window(now_ms)
    }

    /// Whether the sweeper may evict this pass
    ///
    /// Returns false when the observed rate has fallen below
    /// `threshold × expected` for the given lease population. An empty
    /// registry never suppresses.
    pub fn evictions_allowed(&self, lease_count: usize, now_ms: u64) -> bool {
        if !self.enabled || lease_count == 0 {
            return true;
        }

        let expected = self.expected_renewals_per_minute(lease_count);
        let actual = self.actual_renewals_per_minute(now_ms);

        (actual as f64) >= (expected as f64) * self.threshold
    }

    /// Current monitor state for the status surface
    pub fn stats(&self, lease_count: usize, now_ms: u64) -> PreservationStats {
        let expected = self.expected_renewals_per_minute(lease_count);
        let actual = self.actual_renewals_per_minute(now_ms);
        PreservationStats {
            enabled: self.enabled,
            threshold: self.threshold,
            expected_renewals_per_minute: expected,
            actual_renewals_per_minute: actual,
            active: !self.evictions_allowed(lease_count, now_ms),
        }
    }
}
