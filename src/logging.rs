//! Tracing subscriber setup for the binary.
//!
//! The library only emits events; installing a subscriber is the caller's
//! choice. Output goes to stderr so stdout stays machine-readable.

use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` if set, otherwise `level` for this crate
/// (`debug` when `verbose`) and `warn` for dependencies.
#[must_use]
pub fn filter(level: &str, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { level };
        EnvFilter::new(format!("warn,chartcoder={level}"))
    })
}

/// Installs the global fmt subscriber. Safe to call more than once.
pub fn init(level: &str, verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level, verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
