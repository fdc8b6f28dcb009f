use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (process-wide, once) and publish the
    /// static cache TTL gauge.
    pub fn init(cache_ttl_ms: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        describe_pipeline_metrics();
        // absolute TTL, no sliding refresh
        gauge!("dedup_cache_ttl_ms").set(cache_ttl_ms as f64);

        Ok(Self { handle })
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Register HELP text for every pipeline series. Idempotent.
pub fn describe_pipeline_metrics() {
    static DESCRIBED: OnceCell<()> = OnceCell::new();
    DESCRIBED.get_or_init(|| {
        describe_counter!(
            "pipeline_subjects_total",
            "Subjects that reached a terminal status, by status"
        );
        describe_counter!("pipeline_alerts_sent_total", "Fresh alerts dispatched");
        describe_counter!("dedup_cache_hits_total", "Dedup cache lookups that hit");
        describe_counter!(
            "dedup_cache_misses_total",
            "Dedup cache lookups that missed or found an expired entry"
        );
        describe_counter!(
            "delivery_outcomes_total",
            "Per-channel delivery outcomes, by channel and result"
        );
        describe_counter!(
            "pipeline_anomalies_total",
            "External failures reported to the anomaly hook, by kind"
        );
        describe_counter!(
            "enrichment_applied_total",
            "Secondary reviews that produced an enriched confidence"
        );
        describe_histogram!(
            "pipeline_subject_duration_ms",
            Unit::Milliseconds,
            "Wall time of one subject analysis"
        );
        describe_gauge!("dedup_cache_entries", "Live entries in the dedup cache");
        describe_gauge!("dedup_cache_ttl_ms", Unit::Milliseconds, "Configured dedup cache TTL");
    });
}
