//! Log output setup.
//!
//! Library code logs through the `log` macros. The binary installs a
//! `tracing-subscriber` formatter, which also captures `log` records.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,care_relay=debug";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Returns false when a subscriber was already installed (tests, embedding).
pub fn init() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .is_ok()
}

