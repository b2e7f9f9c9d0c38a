//! Subscriber installation.
//!
//! Everything here uses `try_init`, so whichever call runs first wins and
//! later calls are no-ops.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// JSON logs with timestamps, filtered by `RUST_LOG`.
pub fn init() {
    init_with_default_filter(DEFAULT_FILTER);
}

/// Like [`init`], with `default` applied when `RUST_LOG` is absent.
pub fn init_with_default_filter(default: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Human-readable output captured by the test harness.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_test_writer()
        .compact()
        .try_init();
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}
