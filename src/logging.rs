//! Subscriber setup for binaries. The library itself only emits events.

use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the filter directives, e.g. `station_ingest=debug`.
pub const LOG_ENV: &str = "STATION_INGEST_LOG";

/// Install a `fmt` subscriber filtered by [`LOG_ENV`], or by
/// `default_directive` when the variable is unset or invalid.
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .is_ok()
}
