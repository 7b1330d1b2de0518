//! Tracing initialisation
//!
//! Library code only emits `tracing` events; the application decides where
//! they go. `init_tracing` installs the fmt subscriber used by the
//! application shell and the test suite.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "mealsync=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, or `default_filter`
///
/// Returns `false` when a global subscriber was already installed, which
/// makes repeated calls (e.g. from several tests) harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&env_filter))
        .with_target(true)
        .try_init()
        .is_ok()
}
