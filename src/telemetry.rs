//! Tracing setup for binaries and tests embedding the engine.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the host's job. [`init`] offers a reasonable default: env-filtered
//! formatted output plus span traces on errors.

use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the default subscriber. Filter via `RUST_LOG` (defaults to
/// `info`). Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
