//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_filter` is used
/// (typically [`LoggingConfig::filter`](crate::LoggingConfig)).
/// Calling this twice is harmless, the second call is ignored.
///
/// # Example
/// ```
/// renderer_core::init_logging("info");
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
