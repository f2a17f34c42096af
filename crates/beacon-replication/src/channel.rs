//! Replication channel
//!
//! Consumes locally originated [`StoreEvent`]s and fans each one out to
//! every configured peer, fire-and-forget: a slow or dead peer never
//! blocks the mutation that produced the event, and never blocks fan-out
//! to the other peers (each delivery runs in its own task).
//!
//! Failed deliveries go to a bounded retry queue and are retried on a
//! fixed tick once the peer's backoff deadline passes. A delivery is
//! dropped after too many attempts; the startup full sync and ongoing
//! renew replication heal whatever a dropped delivery missed.

use crate::peer::{PeerNode, PeerStatus};
use crate::transport::PeerTransport;
use beacon_core::constants::{
    REPLICATION_ATTEMPTS_COUNT_MAX, REPLICATION_RETRY_QUEUE_COUNT_MAX,
};
use beacon_core::{ReplicationConfig, TimeProvider};
use beacon_registry::StoreEvent;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RETRY_TICK_MS: u64 = 1000;

/// A delivery waiting for its peer's backoff deadline
#[derive(Debug, Clone)]
struct PendingDelivery {
    endpoint: String,
    event: StoreEvent,
    attempts: u32,
}

/// Replication view of one peer, surfaced on the status endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct PeerStats {
    pub endpoint: String,
    pub status: String,
    pub consecutive_failures: u32,
    pub last_success_ms: Option<u64>,
}

/// Fans registry mutations out to peers
pub struct ReplicationChannel {
    peers: Vec<Arc<Mutex<PeerNode>>>,
    transport: Arc<dyn PeerTransport>,
    time: Arc<dyn TimeProvider>,
    config: ReplicationConfig,
    retries: Arc<Mutex<VecDeque<PendingDelivery>>>,
}

impl ReplicationChannel {
    pub fn new(
        config: ReplicationConfig,
        transport: Arc<dyn PeerTransport>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let peers = config
            .peers
            .iter()
            .map(|endpoint| Arc::new(Mutex::new(PeerNode::new(endpoint.clone()))))
            .collect();
        Self {
            peers,
            transport,
            time,
            config,
            retries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Run the fan-out loop until the event source closes or shutdown fires
    pub fn start(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<StoreEvent>,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(peers = self.peers.len(), "replication channel started");
            loop {
                tokio::select! {
                    maybe_event = events.recv() => match maybe_event {
                        Some(event) => {
                            self.fan_out(event);
                        }
                        None => break,
                    },
                    _ = self.time.sleep_ms(RETRY_TICK_MS) => {
                        self.flush_retries();
                    }
                    _ = shutdown.notified() => break,
                }
            }
            info!("replication channel stopped");
        })
    }

    /// Dispatch one event to every peer, one task per peer.
    ///
    /// Returns the delivery tasks so tests can await completion; the run
    /// loop drops them.
    pub fn fan_out(self: &Arc<Self>, event: StoreEvent) -> Vec<JoinHandle<()>> {
        let now_ms = self.time.now_ms();
        self.peers
            .iter()
            .map(|peer| {
                let endpoint = peer.lock().unwrap().endpoint.clone();
                if peer.lock().unwrap().is_available(now_ms) {
                    self.clone().dispatch(peer.clone(), endpoint, event.clone(), 0)
                } else {
                    // peer is backing off; queue without burning an attempt
                    self.enqueue_retry(PendingDelivery {
                        endpoint,
                        event: event.clone(),
                        attempts: 0,
                    });
                    tokio::spawn(async {})
                }
            })
            .collect()
    }

    fn dispatch(
        self: Arc<Self>,
        peer: Arc<Mutex<PeerNode>>,
        endpoint: String,
        event: StoreEvent,
        attempts: u32,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let result = self.transport.replicate(&endpoint, &event).await;
            let now_ms = self.time.now_ms();
            match result {
                Ok(()) => {
                    peer.lock().unwrap().record_success(now_ms);
                }
                Err(error) => {
                    let (failures, status) = {
                        let mut peer = peer.lock().unwrap();
                        peer.record_failure(now_ms, &self.config);
                        (peer.consecutive_failures, peer.status)
                    };
                    warn!(%endpoint, %error, failures, "replication to peer failed");
                    if status == PeerStatus::Degraded && failures == self.config.degraded_failures_count {
                        warn!(%endpoint, "peer marked degraded");
                    }
                    let attempts = attempts + 1;
                    if attempts >= REPLICATION_ATTEMPTS_COUNT_MAX {
                        warn!(%endpoint, attempts, "dropping replication after max attempts");
                    } else {
                        self.enqueue_retry(PendingDelivery {
                            endpoint,
                            event,
                            attempts,
                        });
                    }
                }
            }
        })
    }

    fn enqueue_retry(&self, delivery: PendingDelivery) {
        let mut retries = self.retries.lock().unwrap();
        if retries.len() >= REPLICATION_RETRY_QUEUE_COUNT_MAX {
            // shed oldest first; startup sync on the peer heals the gap
            retries.pop_front();
            warn!("replication retry queue full, dropped oldest delivery");
        }
        retries.push_back(delivery);
    }

    /// Re-dispatch queued deliveries whose peer is past its backoff
    /// deadline; the rest stay queued.
    pub fn flush_retries(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let now_ms = self.time.now_ms();
        let ready: Vec<PendingDelivery> = {
            let mut retries = self.retries.lock().unwrap();
            let mut still_waiting = VecDeque::new();
            let mut ready = Vec::new();
            while let Some(delivery) = retries.pop_front() {
                if self.peer_available(&delivery.endpoint, now_ms) {
                    ready.push(delivery);
                } else {
                    still_waiting.push_back(delivery);
                }
            }
            *retries = still_waiting;
            ready
        };

        ready
            .into_iter()
            .filter_map(|delivery| {
                let peer = self.peer_by_endpoint(&delivery.endpoint)?;
                debug!(endpoint = %delivery.endpoint, attempts = delivery.attempts,
                    "retrying replication delivery");
                Some(self.clone().dispatch(
                    peer,
                    delivery.endpoint,
                    delivery.event,
                    delivery.attempts,
                ))
            })
            .collect()
    }

    fn peer_by_endpoint(&self, endpoint: &str) -> Option<Arc<Mutex<PeerNode>>> {
        self.peers
            .iter()
            .find(|peer| peer.lock().unwrap().endpoint == endpoint)
            .cloned()
    }

    fn peer_available(&self, endpoint: &str, now_ms: u64) -> bool {
        self.peer_by_endpoint(endpoint)
            .map(|peer| peer.lock().unwrap().is_available(now_ms))
            .unwrap_or(false)
    }

    /// Number of deliveries waiting on peer backoff
    pub fn retry_queue_len(&self) -> usize {
        self.retries.lock().unwrap().len()
    }

    /// Per-peer replication health, for the status surface
    pub fn peer_stats(&self) -> Vec<PeerStats> {
        self.peers
            .iter()
            .map(|peer| {
                let peer = peer.lock().unwrap();
                PeerStats {
                    endpoint: peer.endpoint.clone(),
                    status: peer.status.to_string(),
                    consecutive_failures: peer.consecutive_failures,
                    last_success_ms: peer.last_success_ms,
                }
            })
            .collect()
    }
}
