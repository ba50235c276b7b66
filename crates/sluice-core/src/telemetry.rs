//! Tracing setup.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a fmt subscriber (if one is not already active).
///
/// Honours `RUST_LOG`, otherwise falls back to `default_filter`
/// (e.g. `info` or `sluice_core=debug`). Calling this more than once is harmless.
pub fn init_tracing(default_filter: &str) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    let _ = TRACING_INIT.set(());
}
