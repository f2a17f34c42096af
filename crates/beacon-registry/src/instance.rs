//! Instance identity and lease types
//!
//! An instance's identity is immutable once registered; the lease wrapping
//! it is the mutable record owned by the lease store.

use crate::error::{RegistryError, RegistryResult};
use beacon_core::constants::{
    APP_NAME_LENGTH_BYTES_MAX, INSTANCE_ID_LENGTH_BYTES_MAX, INSTANCE_METADATA_COUNT_MAX,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

fn valid_ident_chars(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ':')
}

/// Application name grouping a set of instances
///
/// Normalized to uppercase so lookups are case-insensitive.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct AppName(String);

impl TryFrom<String> for AppName {
    type Error = RegistryError;

    fn try_from(name: String) -> RegistryResult<Self> {
        Self::new(name)
    }
}

impl AppName {
    /// Create a validated, normalized application name
    pub fn new(name: impl Into<String>) -> RegistryResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(RegistryError::InvalidAppName {
                name,
                reason: "application name cannot be empty".into(),
            });
        }
        if name.len() > APP_NAME_LENGTH_BYTES_MAX {
            return Err(RegistryError::InvalidAppName {
                reason: format!(
                    "length {} exceeds limit {}",
                    name.len(),
                    APP_NAME_LENGTH_BYTES_MAX
                ),
                name,
            });
        }
        if !valid_ident_chars(&name) {
            return Err(RegistryError::InvalidAppName {
                name,
                reason: "contains invalid characters".into(),
            });
        }

        Ok(Self(name.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AppName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for an instance within an application
///
/// Conventionally `hostname:port`; any stable string within length and
/// character limits is accepted.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct InstanceId(String);

impl TryFrom<String> for InstanceId {
    type Error = RegistryError;

    fn try_from(id: String) -> RegistryResult<Self> {
        Self::new(id)
    }
}

impl InstanceId {
    /// Create a validated instance ID
    pub fn new(id: impl Into<String>) -> RegistryResult<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(RegistryError::InvalidInstanceId {
                id,
                reason: "instance ID cannot be empty".into(),
            });
        }
        if id.len() > INSTANCE_ID_LENGTH_BYTES_MAX {
            return Err(RegistryError::InvalidInstanceId {
                reason: format!(
                    "length {} exceeds limit {}",
                    id.len(),
                    INSTANCE_ID_LENGTH_BYTES_MAX
                ),
                id,
            });
        }
        if !valid_ident_chars(&id) {
            return Err(RegistryError::InvalidInstanceId {
                id,
                reason: "contains invalid characters".into(),
            });
        }

        Ok(Self(id))
    }

    /// Derive an instance ID from the local hostname and a port
    pub fn from_host_port(port: u16) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self(format!("{}:{}", host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reported status of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
    OutOfService,
    Unknown,
}

impl InstanceStatus {
    /// Whether discovery should prefer this instance for traffic
    pub fn is_up(&self) -> bool {
        matches!(self, InstanceStatus::Up)
    }
}

impl Default for InstanceStatus {
    fn default() -> Self {
        InstanceStatus::Up
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::OutOfService => "OUT_OF_SERVICE",
            InstanceStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Immutable network identity of a registered instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    /// Unique within the application group
    pub instance_id: InstanceId,
    /// Application this instance belongs to
    pub app_name: AppName,
    /// Hostname for discovery callers
    pub hostname: String,
    /// IP address for discovery callers
    pub ip_addr: String,
    /// Primary service port
    pub port: u16,
    /// Optional TLS port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<u16>,
    /// Free-form instance metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl InstanceIdentity {
    /// Validate required identity fields
    pub fn validate(&self) -> RegistryResult<()> {
        if self.hostname.is_empty() {
            return Err(RegistryError::invalid_identity(
                "hostname",
                "cannot be empty",
            ));
        }
        if self.ip_addr.is_empty() {
            return Err(RegistryError::invalid_identity("ip_addr", "cannot be empty"));
        }
        if self.port == 0 {
            return Err(RegistryError::invalid_identity("port", "cannot be zero"));
        }
        if self.metadata.len() > INSTANCE_METADATA_COUNT_MAX {
            return Err(RegistryError::invalid_identity(
                "metadata",
                format!(
                    "{} entries exceeds limit {}",
                    self.metadata.len(),
                    INSTANCE_METADATA_COUNT_MAX
                ),
            ));
        }
        Ok(())
    }
}

/// Time-bounded claim by an instance that it is alive
///
/// Owned exclusively by the lease store; everything handed out of the
/// store is a snapshot clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Identity of the leased instance
    pub identity: InstanceIdentity,
    /// Reported status
    pub status: InstanceStatus,
    /// When this registration was (last) accepted, Unix ms
    pub registered_at_ms: u64,
    /// Last renewal, Unix ms
    pub last_renewal_ms: u64,
    /// Set when the sweeper expires this lease; evicted leases are
    /// excluded from discovery reads but retained briefly for replication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evicted_at_ms: Option<u64>,
    /// Time without renewal after which this lease expires
    pub duration_ms: u64,
}

impl Lease {
    /// Create a fresh lease, renewal clock starting now
    pub fn new(
        identity: InstanceIdentity,
        status: InstanceStatus,
        duration_ms: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            identity,
            status,
            registered_at_ms: now_ms,
            last_renewal_ms: now_ms,
            evicted_at_ms: None,
            duration_ms,
        }
    }

    /// Advance the renewal clock and clear any pending eviction
    pub fn renew(&mut self, now_ms: u64) {
        self.last_renewal_ms = now_ms;
        self.evicted_at_ms = None;
    }

    /// Whether the renewal clock has run out
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_renewal_ms) > self.duration_ms
    }

    /// Whether the sweeper has already expired this lease
    pub fn is_evicted(&self) -> bool {
        self.evicted_at_ms.is_some()
    }

    /// Mark this lease evicted
    pub fn mark_evicted(&mut self, now_ms: u64) {
        self.evicted_at_ms = Some(now_ms);
    }

    /// Convenience accessor for the owning application
    pub fn app_name(&self) -> &AppName {
        &self.identity.app_name
    }

    /// Convenience accessor for the instance ID
    pub fn instance_id(&self) -> &InstanceId {
        &self.identity.instance_id
    }
}
