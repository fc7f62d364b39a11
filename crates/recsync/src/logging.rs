//! Tracing initialization for embedders and tests.
//!
//! The engine emits through both the `log` and `tracing` macros. Embedders
//! that already install their own subscriber can skip this entirely; calling
//! it twice is harmless.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a formatting subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_err()
        {
            // A subscriber is already installed by the embedder; still route
            // `log` records into it if nothing has claimed the log facade.
            let _ = tracing_log::LogTracer::init();
        }
    });
}
