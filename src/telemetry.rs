// src/telemetry.rs
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "ticker_alert_pipeline=info,warn";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over [`DEFAULT_FILTER`]; `LOG_FORMAT=json` switches to
/// one-JSON-object-per-line output. Returns `false` when a subscriber was
/// already installed (e.g. by the hosting runtime), which is not an error.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(target: "pipeline", json, "logging initialized");
    }
    installed
}
