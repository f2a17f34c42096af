//! Beacon Replication
//!
//! Peer-to-peer state propagation for the Beacon service registry:
//!
//! - Replication channel: fire-and-forget fan-out of local mutations to
//!   every configured peer, with per-peer backoff and a bounded retry
//!   queue
//! - Peer tracking: health and backoff state for statically configured
//!   peers (degraded peers are skipped, never removed)
//! - Startup sync: full registry pull from the first reachable peer
//!   before a node serves traffic
//!
//! Replication is availability-first: peers converge through
//! last-writer-wins conflict resolution, and a replicated mutation is
//! never re-replicated by its receiver.

pub mod channel;
pub mod error;
pub mod peer;
pub mod sync;
pub mod transport;

pub use channel::{PeerStats, ReplicationChannel};
pub use error::{ReplicationError, ReplicationResult};
pub use peer::{PeerNode, PeerStatus};
pub use sync::sync_from_peers;
pub use transport::{HttpPeerTransport, InMemoryPeerTransport, PeerTransport};
