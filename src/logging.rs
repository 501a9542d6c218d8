use std::time::Instant;

use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "url_stripper=info,tower_http=info";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
///
/// With `app_env == "production"` events are written as JSON lines, otherwise
/// in the human-readable pretty format. Output goes to stderr so the `strip`
/// command keeps stdout for URLs.
pub fn init_logging(app_env: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let base = Registry::default().with(filter).with(ErrorLayer::default());

    match app_env {
        "production" => base
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init(),
        _ => base
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init(),
    }

    tracing::info!(env = %app_env, "Logging system initialized");
}

/// Emits a debug event with the elapsed milliseconds when dropped.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(label: &'static str) -> Self {
        Self { label, start: Instant::now() }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        tracing::debug!(
            label = %self.label,
            duration_ms = %self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }
}
