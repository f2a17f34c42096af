//! Peer node tracking
//!
//! Peers come from static configuration at startup. A peer that keeps
//! failing is marked degraded and skipped until its backoff deadline, but
//! is never removed automatically; operators remove peers by changing
//! configuration.

use beacon_core::ReplicationConfig;
use std::fmt;

/// Replication health of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    /// Accepting replication normally
    Healthy,
    /// Too many consecutive failures; contacted only on backoff deadlines
    Degraded,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerStatus::Healthy => write!(f, "healthy"),
            PeerStatus::Degraded => write!(f, "degraded"),
        }
    }
}

/// A known peer registry node
#[derive(Debug, Clone)]
pub struct PeerNode {
    /// Base URL, e.g. "http://registry-2:8761"
    pub endpoint: String,
    pub status: PeerStatus,
    pub consecutive_failures: u32,
    /// Earliest time the next send attempt may go out, Unix ms
    pub next_attempt_ms: u64,
    pub last_success_ms: Option<u64>,
}

impl PeerNode {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: PeerStatus::Healthy,
            consecutive_failures: 0,
            next_attempt_ms: 0,
            last_success_ms: None,
        }
    }

    /// Whether a send may go out now
    pub fn is_available(&self, now_ms: u64) -> bool {
        now_ms >= self.next_attempt_ms
    }

    /// Record a successful send, restoring the peer to healthy
    pub fn record_success(&mut self, now_ms: u64) {
        self.status = PeerStatus::Healthy;
        self.consecutive_failures = 0;
        self.next_attempt_ms = now_ms;
        self.last_success_ms = Some(now_ms);
    }

    /// Record a failed send, pushing the next attempt out exponentially
    pub fn record_failure(&mut self, now_ms: u64, config: &ReplicationConfig) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= config.degraded_failures_count {
            self.status = PeerStatus::Degraded;
        }
        self.next_attempt_ms = now_ms + backoff_ms(self.consecutive_failures, config);
    }
}

/// Exponential backoff for the nth consecutive failure, capped
pub fn backoff_ms(failures: u32, config: &ReplicationConfig) -> u64 {
    let exponent = failures.saturating_sub(1).min(20);
    config
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_ms_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let config = ReplicationConfig::default();
        assert_eq!(backoff_ms(1, &config), 1000);
        assert_eq!(backoff_ms(2, &config), 2000);
        assert_eq!(backoff_ms(3, &config), 4000);
        assert_eq!(backoff_ms(10, &config), 60_000); // capped
        assert_eq!(backoff_ms(u32::MAX, &config), 60_000); // no overflow
    }

    #[test]
    fn test_peer_degrades_after_threshold() {
        let config = ReplicationConfig::default();
        let mut peer = PeerNode::new("http://peer-a:8761");
        assert_eq!(peer.status, PeerStatus::Healthy);

        peer.record_failure(1000, &config);
        peer.record_failure(3000, &config);
        assert_eq!(peer.status, PeerStatus::Healthy);

        peer.record_failure(8000, &config);
        assert_eq!(peer.status, PeerStatus::Degraded);
        assert!(!peer.is_available(8000));
        assert!(peer.is_available(8000 + 4000));
    }

    #[test]
    fn test_success_resets_peer() {
        let config = ReplicationConfig::default();
        let mut peer = PeerNode::new("http://peer-a:8761");

        for t in [1000, 2000, 3000, 4000] {
            peer.record_failure(t, &config);
        }
        assert_eq!(peer.status, PeerStatus::Degraded);

        peer.record_success(20_000);
        assert_eq!(peer.status, PeerStatus::Healthy);
        assert_eq!(peer.consecutive_failures, 0);
        assert!(peer.is_available(20_000));
        assert_eq!(peer.last_success_ms, Some(20_000));
    }
}
