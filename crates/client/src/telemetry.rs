//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Build the filter used by [`init`].
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a global fmt subscriber at `level`.
///
/// Calling this more than once is harmless; later calls leave the first
/// subscriber in place.
pub fn init(level: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(level, "tracing initialized");
    }
}
