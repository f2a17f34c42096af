//! Beacon Server
//!
//! HTTP registry node: the lease store, eviction sweeper, and replication
//! channel wired behind the registry API.

pub mod api;
pub mod models;
pub mod state;

pub use api::router;
pub use state::AppState;
