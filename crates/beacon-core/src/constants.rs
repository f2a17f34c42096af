//! Limits and defaults for the Beacon registry
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identity Limits
// =============================================================================

/// Maximum length of an application name in bytes
pub const APP_NAME_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an instance ID in bytes
pub const INSTANCE_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum number of metadata entries per instance
pub const INSTANCE_METADATA_COUNT_MAX: usize = 64;

// =============================================================================
// Lease Limits
// =============================================================================

/// Default lease duration in milliseconds (90 sec)
pub const LEASE_DURATION_MS_DEFAULT: u64 = 90 * 1000;

/// Minimum lease duration in milliseconds (1 sec)
pub const LEASE_DURATION_MS_MIN: u64 = 1000;

/// Maximum lease duration in milliseconds (1 hour)
pub const LEASE_DURATION_MS_MAX: u64 = 60 * 60 * 1000;

/// Expected interval between client renewals in milliseconds (30 sec)
pub const RENEWAL_INTERVAL_MS_DEFAULT: u64 = 30 * 1000;

/// Maximum number of registered leases per node
pub const REGISTRY_LEASES_COUNT_MAX: usize = 100_000;

// =============================================================================
// Eviction Sweep
// =============================================================================

/// Interval between eviction sweep passes in milliseconds (60 sec)
pub const SWEEP_INTERVAL_MS_DEFAULT: u64 = 60 * 1000;

/// Maximum share of registered leases evicted per sweep pass, in percent
pub const EVICTION_CAP_PERCENT_DEFAULT: u8 = 15;

/// How long an evicted lease is retained before physical removal (30 sec)
///
/// Evicted leases are invisible to discovery reads but kept briefly so the
/// DELETE has been handed to the replication channel before the record
/// disappears.
pub const EVICTED_RETENTION_MS_DEFAULT: u64 = 30 * 1000;

// =============================================================================
// Self-Preservation
// =============================================================================

/// Renewal-rate threshold below which eviction is suppressed (fraction of
/// the expected rate)
pub const SELF_PRESERVATION_THRESHOLD_DEFAULT: f64 = 0.85;

/// Width of the sliding renewal-rate window in milliseconds (1 min)
pub const RENEWAL_WINDOW_MS: u64 = 60 * 1000;

// =============================================================================
// Delta Queue
// =============================================================================

/// Retention window for delta entries in milliseconds (3 min)
///
/// A client whose last fetch predates this window must fall back to a full
/// registry fetch.
pub const DELTA_RETENTION_MS_DEFAULT: u64 = 3 * 60 * 1000;

// =============================================================================
// Replication
// =============================================================================

/// Base delay for replication retry backoff in milliseconds (1 sec)
pub const REPLICATION_BACKOFF_BASE_MS_DEFAULT: u64 = 1000;

/// Maximum delay for replication retry backoff in milliseconds (60 sec)
pub const REPLICATION_BACKOFF_MS_MAX_DEFAULT: u64 = 60 * 1000;

/// Consecutive failures before a peer is marked degraded
pub const PEER_DEGRADED_FAILURES_COUNT_DEFAULT: u32 = 3;

/// Maximum attempts to deliver a single replication event to a peer
pub const REPLICATION_ATTEMPTS_COUNT_MAX: u32 = 5;

/// Maximum number of queued replication retries
pub const REPLICATION_RETRY_QUEUE_COUNT_MAX: usize = 10_000;

// =============================================================================
// Client Cache
// =============================================================================

/// Interval between client cache delta fetches in milliseconds (30 sec)
pub const CACHE_REFRESH_INTERVAL_MS_DEFAULT: u64 = 30 * 1000;
