//! Ticker Alert Pipeline — Binary Entrypoint
//! Loads config, wires the pipeline, validates channels, starts the cache
//! sweeper and serves the Axum router on the Shuttle runtime.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;

use ticker_alert_pipeline::{api, metrics::Metrics, telemetry, AppState, Pipeline, PipelineConfig};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let config = PipelineConfig::load()?;
    let ttl_ms = u64::try_from(config.cache_ttl().as_millis()).unwrap_or(u64::MAX);
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    pipeline.start().await;

    let mut router = api::router(AppState::new(pipeline));
    match Metrics::init(ttl_ms) {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => tracing::warn!(target: "pipeline", error = %e, "metrics disabled"),
    }

    Ok(router.into())
}
