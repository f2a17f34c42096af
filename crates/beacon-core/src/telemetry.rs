//! Logging initialization
//!
//! Structured logging via tracing; the env filter wins over the passed
//! default so operators can override per-target levels with `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// `default_level` is used when `RUST_LOG` is not set (e.g. "info",
/// "beacon_registry=debug"). Safe to call once per process; later calls
/// are ignored.
pub fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
