//! Tracing infrastructure.
//!
//! Structured, async-aware logging built on `tracing` and
//! `tracing-subscriber`. The filter defaults to the configured level and can
//! be overridden per-module through `RUST_LOG`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// `level` is used when `RUST_LOG` is not set. Safe to call once per process;
/// a second call returns an error from the subscriber registry.
pub fn init(level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_names(true))
        .try_init()?;

    Ok(())
}
