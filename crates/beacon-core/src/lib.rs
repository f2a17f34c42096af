//! Beacon Core
//!
//! Shared foundation for the Beacon service registry: configuration,
//! constants, error types, and the time/RNG abstraction that keeps every
//! time-dependent code path deterministic under test.

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod telemetry;

pub use config::{
    BeaconConfig, CacheConfig, DeltaConfig, LeaseConfig, NodeConfig, PreservationConfig,
    ReplicationConfig, SweepConfig,
};
pub use constants::*;
pub use error::{Error, Result};
pub use io::{MockClock, RngProvider, SeededRngProvider, StdRngProvider, TimeProvider, WallClockTime};
pub use telemetry::init_logging;
