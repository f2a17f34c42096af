//! Registry node configuration
//!
//! Explicit defaults, serde-backed YAML loading, per-section validation.
//! Every tuning knob here is a conventional default for this class of
//! registry, not a wire-compatibility requirement.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for a Beacon registry node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Node identity and bind address
    #[serde(default)]
    pub node: NodeConfig,

    /// Lease durations and renewal cadence
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Eviction sweep tuning
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Self-preservation tuning
    #[serde(default)]
    pub preservation: PreservationConfig,

    /// Delta queue retention
    #[serde(default)]
    pub delta: DeltaConfig,

    /// Peer replication
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Client-side cache refresh cadence (used by embedded clients)
    #[serde(default)]
    pub cache: CacheConfig,
}

impl BeaconConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = serde_yaml::from_str(&text).map_err(|e| Error::ConfigParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.lease.validate()?;
        self.sweep.validate()?;
        self.preservation.validate()?;
        self.delta.validate()?;
        self.replication.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

/// Node identity and bind address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier (auto-generated from hostname if not set)
    #[serde(default)]
    pub node_id: Option<String>,

    /// Address to bind the registry API (default: 0.0.0.0:8761)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8761".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bind_address: default_bind_address(),
        }
    }
}

impl NodeConfig {
    fn validate(&self) -> Result<()> {
        if !self.bind_address.contains(':') {
            return Err(Error::invalid_configuration(
                "node.bind_address",
                "must be in host:port format",
            ));
        }
        Ok(())
    }
}

/// Lease durations and renewal cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Default lease duration when a registration does not specify one
    #[serde(default = "default_lease_duration_ms")]
    pub duration_ms_default: u64,

    /// Expected interval between client renewals
    ///
    /// Feeds the self-preservation monitor's expected renewal rate.
    #[serde(default = "default_renewal_interval_ms")]
    pub renewal_interval_ms: u64,
}

fn default_lease_duration_ms() -> u64 {
    LEASE_DURATION_MS_DEFAULT
}

fn default_renewal_interval_ms() -> u64 {
    RENEWAL_INTERVAL_MS_DEFAULT
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_ms_default: default_lease_duration_ms(),
            renewal_interval_ms: default_renewal_interval_ms(),
        }
    }
}

impl LeaseConfig {
    fn validate(&self) -> Result<()> {
        if self.duration_ms_default < LEASE_DURATION_MS_MIN
            || self.duration_ms_default > LEASE_DURATION_MS_MAX
        {
            return Err(Error::invalid_configuration(
                "lease.duration_ms_default",
                format!(
                    "must be between {} and {} ms",
                    LEASE_DURATION_MS_MIN, LEASE_DURATION_MS_MAX
                ),
            ));
        }
        if self.renewal_interval_ms == 0 {
            return Err(Error::invalid_configuration(
                "lease.renewal_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.renewal_interval_ms >= self.duration_ms_default {
            return Err(Error::invalid_configuration(
                "lease.renewal_interval_ms",
                "must be shorter than the lease duration",
            ));
        }
        Ok(())
    }
}

/// Eviction sweep tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweep passes
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,

    /// Maximum share of registered leases evicted per pass, in percent
    ///
    /// At least one candidate is always evictable per pass so small
    /// registries are not starved.
    #[serde(default = "default_eviction_cap_percent")]
    pub eviction_cap_percent: u8,

    /// How long evicted leases are retained before physical removal
    #[serde(default = "default_evicted_retention_ms")]
    pub evicted_retention_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    SWEEP_INTERVAL_MS_DEFAULT
}

fn default_eviction_cap_percent() -> u8 {
    EVICTION_CAP_PERCENT_DEFAULT
}

fn default_evicted_retention_ms() -> u64 {
    EVICTED_RETENTION_MS_DEFAULT
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
            eviction_cap_percent: default_eviction_cap_percent(),
            evicted_retention_ms: default_evicted_retention_ms(),
        }
    }
}

impl SweepConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::invalid_configuration(
                "sweep.interval_ms",
                "must be greater than zero",
            ));
        }
        if self.eviction_cap_percent == 0 || self.eviction_cap_percent > 100 {
            return Err(Error::invalid_configuration(
                "sweep.eviction_cap_percent",
                "must be between 1 and 100",
            ));
        }
        Ok(())
    }
}

/// Self-preservation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservationConfig {
    /// Whether eviction suppression is enabled at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fraction of the expected renewal rate below which eviction is
    /// suppressed
    #[serde(default = "default_preservation_threshold")]
    pub threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_preservation_threshold() -> f64 {
    SELF_PRESERVATION_THRESHOLD_DEFAULT
}

impl Default for PreservationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_preservation_threshold(),
        }
    }
}

impl PreservationConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::invalid_configuration(
                "preservation.threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }
}

/// Delta queue retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaConfig {
    /// Retention window for delta entries
    #[serde(default = "default_delta_retention_ms")]
    pub retention_ms: u64,
}

fn default_delta_retention_ms() -> u64 {
    DELTA_RETENTION_MS_DEFAULT
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            retention_ms: default_delta_retention_ms(),
        }
    }
}

impl DeltaConfig {
    fn validate(&self) -> Result<()> {
        if self.retention_ms == 0 {
            return Err(Error::invalid_configuration(
                "delta.retention_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Peer replication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Base URLs of peer registry nodes (e.g. "http://registry-2:8761")
    #[serde(default)]
    pub peers: Vec<String>,

    /// Base delay for retry backoff
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Maximum delay for retry backoff
    #[serde(default = "default_backoff_ms_max")]
    pub backoff_ms_max: u64,

    /// Consecutive failures before a peer is marked degraded
    #[serde(default = "default_degraded_failures")]
    pub degraded_failures_count: u32,
}

fn default_backoff_base_ms() -> u64 {
    REPLICATION_BACKOFF_BASE_MS_DEFAULT
}

fn default_backoff_ms_max() -> u64 {
    REPLICATION_BACKOFF_MS_MAX_DEFAULT
}

fn default_degraded_failures() -> u32 {
    PEER_DEGRADED_FAILURES_COUNT_DEFAULT
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_ms_max: default_backoff_ms_max(),
            degraded_failures_count: default_degraded_failures(),
        }
    }
}

impl ReplicationConfig {
    fn validate(&self) -> Result<()> {
        for peer in &self.peers {
            if !peer.starts_with("http://") && !peer.starts_with("https://") {
                return Err(Error::invalid_configuration(
                    "replication.peers",
                    format!("peer endpoint '{}' must be an http(s) URL", peer),
                ));
            }
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_ms_max {
            return Err(Error::invalid_configuration(
                "replication.backoff_base_ms",
                "must be nonzero and no larger than backoff_ms_max",
            ));
        }
        if self.degraded_failures_count == 0 {
            return Err(Error::invalid_configuration(
                "replication.degraded_failures_count",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Client-side cache refresh cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Interval between delta fetches
    #[serde(default = "default_cache_refresh_ms")]
    pub refresh_interval_ms: u64,
}

fn default_cache_refresh_ms() -> u64 {
    CACHE_REFRESH_INTERVAL_MS_DEFAULT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_cache_refresh_ms(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.refresh_interval_ms == 0 {
            return Err(Error::invalid_configuration(
                "cache.refresh_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = BeaconConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let config: BeaconConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.lease.duration_ms_default, LEASE_DURATION_MS_DEFAULT);
        assert_eq!(config.sweep.interval_ms, SWEEP_INTERVAL_MS_DEFAULT);
        assert!(config.preservation.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_renewal_interval_must_undercut_duration() {
        let mut config = BeaconConfig::default();
        config.lease.renewal_interval_ms = config.lease.duration_ms_default;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_endpoint_validation() {
        let mut config = BeaconConfig::default();
        config.replication.peers = vec!["registry-2:8761".to_string()];
        assert!(config.validate().is_err());

        config.replication.peers = vec!["http://registry-2:8761".to_string()];
        config.validate().unwrap();
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = BeaconConfig::default();
        config.preservation.threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let yaml = r#"
lease:
  duration_ms_default: 30000
  renewal_interval_ms: 10000
replication:
  peers:
    - "http://peer-a:8761"
    - "http://peer-b:8761"
"#;
        let config: BeaconConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.lease.duration_ms_default, 30_000);
        assert_eq!(config.replication.peers.len(), 2);
        // untouched sections keep defaults
        assert_eq!(config.delta.retention_ms, DELTA_RETENTION_MS_DEFAULT);
        config.validate().unwrap();
    }
}
