//! Tracing setup shared by the workspace binaries.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "ibkr_parser=info";

/// Initialize tracing with `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

/// Initialize tracing with `RUST_LOG`, falling back to `default_filter`.
/// Calling it twice is harmless; the second subscriber is ignored.
pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logger initialized");
    }
}
