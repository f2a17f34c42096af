//! Versioned delta log of registry mutations
//!
//! Clients poll this instead of re-fetching the full registry: each
//! mutation appends an entry with a monotonically increasing version, and
//! entries older than the retention window are purged. A client whose last
//! known version predates the window must fall back to a full fetch.

use crate::error::{RegistryError, RegistryResult};
use crate::instance::Lease;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Kind of registry mutation recorded in a delta entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    Add,
    Modify,
    Delete,
}

/// A single recorded mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// What happened
    pub action: DeltaAction,
    /// Lease snapshot at mutation time
    pub lease: Lease,
    /// Monotonically increasing version
    pub version: u64,
    /// When the mutation was recorded, Unix ms
    pub timestamp_ms: u64,
}

/// Append-only, time-bounded mutation log
///
/// Not internally synchronized: the lease store owns one behind its write
/// lock, which is what makes version order agree with map state.
#[derive(Debug)]
pub struct DeltaQueue {
    entries: VecDeque<DeltaEntry>,
    /// Version assigned to the next appended entry
    next_version: u64,
    /// Highest version discarded by retention purge
    purged_through_version: u64,
    retention_ms: u64,
}

impl DeltaQueue {
    pub fn new(retention_ms: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            next_version: 1,
            purged_through_version: 0,
            retention_ms,
        }
    }

    /// Record a mutation, purging entries past retention first
    ///
    /// Returns the version assigned to the new entry.
    pub fn append(&mut self, action: DeltaAction, lease: Lease, now_ms: u64) -> u64 {
        self.purge_expired(now_ms);

        let version = self.next_version;
        self.next_version += 1;

        self.entries.push_back(DeltaEntry {
            action,
            lease,
            version,
            timestamp_ms: now_ms,
        });

        version
    }

    /// Version of the most recent entry ever appended
    pub fn latest_version(&self) -> u64 {
        self.next_version - 1
    }

    /// Entries newer than `since_version`, oldest first
    ///
    /// Fails with [`RegistryError::DeltaExpired`] when `since_version`
    /// predates the retention window, signalling that the caller must do a
    /// full fetch instead.
    pub fn entries_since(
        &mut self,
        since_version: u64,
        now_ms: u64,
    ) -> RegistryResult<Vec<DeltaEntry>> {
        self.purge_expired(now_ms);

        if since_version < self.purged_through_version {
            return Err(RegistryError::DeltaExpired {
                since_version,
                oldest_version: self.purged_through_version + 1,
            });
        }

        Ok(self
            .entries
            .iter()
            .filter(|e| e.version > since_version)
            .cloned()
            .collect())
    }

    /// Drop entries older than the retention window
    fn purge_expired(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.retention_ms);
        while let Some(front) = self.entries.front() {
            if front.timestamp_ms < cutoff {
                self.purged_through_version = front.version;
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
