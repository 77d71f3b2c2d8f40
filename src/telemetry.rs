//! Logging setup for test binaries
//!
//! The engine only emits `tracing` events. Call [`init_tracing`] once (extra
//! calls are ignored) to print them, filtered by `SURROGATE_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const ENV_LOG: &str = "SURROGATE_LOG";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("surrogate=warn"));
    let _ = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_test_writer())
        .try_init();
}
