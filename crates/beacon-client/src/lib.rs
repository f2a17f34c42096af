//! Beacon Client
//!
//! Client library for services that talk to a Beacon registry:
//!
//! - Registration: register on startup, heartbeat on the renewal
//!   interval, deregister on shutdown, re-register when the registry
//!   loses the lease
//! - Cache: local registry view answering lookups without a network
//!   round trip, even when stale
//! - Refresher: delta polling with full-fetch fallback when the delta
//!   window has expired
//!
//! All registry traffic goes through the [`RegistryApi`] seam so the
//! loops are testable without a server.

pub mod api;
pub mod cache;
pub mod error;
pub mod refresher;
pub mod registration;

pub use api::{DeltaFetch, HttpRegistryApi, RegistryApi, RenewOutcome};
pub use cache::ClientCache;
pub use error::{ClientError, ClientResult};
pub use refresher::CacheRefresher;
pub use registration::InstanceRegistration;
