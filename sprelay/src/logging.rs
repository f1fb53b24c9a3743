//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Install the daemon's subscriber: human-readable lines on stderr, filtered
/// by `RUST_LOG` (default `info`).
///
/// Does nothing when a global subscriber is already installed.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Development helper: initialize tracing only when `RUST_LOG` is set.
///
/// Tests call `sprelay::logging::init_tracing()` to get logs while debugging.
pub fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
