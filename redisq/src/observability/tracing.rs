//! Subscriber setup for binaries and tests that want log output

#[cfg(feature = "tracing-basic")]
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global fmt subscriber filtered by `RUST_LOG` (default `info`)
///
/// Returns `false` when a global subscriber was already installed.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// JSON-formatted variant of [`init_tracing`] for log shippers
#[cfg(feature = "tracing-basic")]
pub fn init_json_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .try_init()
        .is_ok()
}
