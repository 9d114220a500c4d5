//! Tracing setup for the crawler binary.
//!
//! One compact stdout layer with `RUST_LOG`-based filtering (default
//! "info"). Initialization is idempotent so tests can call it freely.

use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the global tracing subscriber.
///
/// # Environment Variables
/// * `RUST_LOG` - log level filtering, e.g. `RUST_LOG=dataset_crawler=debug`
pub fn init_logging() {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap_or_default();

        let stdout_layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .init();
    });
}
