//! Beacon Registry
//!
//! Registry core for the Beacon service discovery system:
//!
//! - Lease store: authoritative instance -> lease mapping with
//!   snapshot-isolated reads
//! - Delta queue: versioned, time-bounded mutation log for incremental
//!   client fetches
//! - Self-preservation monitor: suppresses eviction when the aggregate
//!   renewal rate collapses (partition heuristic)
//! - Eviction sweeper: single-flight periodic expiry of stale leases
//!
//! This crate is transport-free; the HTTP surface lives in
//! `beacon-server` and peer fan-out in `beacon-replication`.

pub mod delta;
pub mod error;
pub mod instance;
pub mod preservation;
pub mod store;
pub mod sweeper;
pub mod wire;

pub use delta::{DeltaAction, DeltaEntry, DeltaQueue};
pub use error::{RegistryError, RegistryResult};
pub use instance::{AppName, InstanceId, InstanceIdentity, InstanceStatus, Lease};
pub use preservation::{PreservationStats, SelfPreservationMonitor};
pub use store::{LeaseStore, StoreEvent};
pub use sweeper::{EvictionSweeper, SweepOutcome};
pub use wire::{
    ApplicationResponse, DeltaResponse, FullRegistryResponse, RegisterRequest,
    StatusOverrideRequest, REPLICATION_HEADER,
};
