//! I/O abstraction for time and randomness
//!
//! All lease expiry, sweep scheduling, backoff, and retention logic goes
//! through these traits so the same code runs against the wall clock in
//! production and a manually advanced clock in tests. Never call
//! `SystemTime::now()` from registry logic directly.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time source abstraction
///
/// # Implementations
///
/// - [`WallClockTime`]: production, system clock
/// - [`MockClock`]: tests, manually advanced
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the given duration
    ///
    /// Production sleeps on the tokio timer; a mock clock advances its own
    /// time and returns immediately.
    async fn sleep_ms(&self, ms: u64);
}

/// Production time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

/// Manually advanced clock for deterministic tests
#[derive(Debug, Default)]
pub struct MockClock {
    time_ms: AtomicU64,
}

impl MockClock {
    /// Create a mock clock starting at the given time
    pub fn new(initial_ms: u64) -> Self {
        Self {
            time_ms: AtomicU64::new(initial_ms),
        }
    }

    /// Advance time by the given milliseconds
    pub fn advance(&self, ms: u64) {
        self.time_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set time to a specific value
    pub fn set(&self, ms: u64) {
        self.time_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeProvider for MockClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
        // keep loops built on mock sleeps cooperative
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number generator abstraction
///
/// Used for eviction-order shuffling and peer selection. Inject a seeded
/// provider in tests for reproducible runs.
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Next random u64
    fn next_u64(&self) -> u64;

    /// Random value in `[min, max)`
    ///
    /// Returns `min` when the range is empty.
    fn gen_range(&self, min: u64, max: u64) -> u64;
}

/// Production RNG backed by the thread-local generator
#[derive(Debug, Clone, Default)]
pub struct StdRngProvider;

impl StdRngProvider {
    pub fn new() -> Self {
        Self
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        rand::thread_rng().next_u64()
    }

    fn gen_range(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..max)
    }
}

/// Seeded RNG for deterministic tests
#[derive(Debug)]
pub struct SeededRngProvider {
    rng: Mutex<StdRng>,
}

impl SeededRngProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RngProvider for SeededRngProvider {
    fn next_u64(&self) -> u64 {
        self.rng.lock().expect("rng lock").next_u64()
    }

    fn gen_range(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        self.rng.lock().expect("rng lock").gen_range(min..max)
    }
}
