// src/pipeline/anomaly.rs
//! Observability hook for external failures (exhausted retries, failed deliveries).
//! Reporting is best-effort: implementations must not fail the caller.

use metrics::counter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    ClassifierFailure,
    DeliveryFailure,
    TaskPanic,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::ClassifierFailure => "classifier_failure",
            AnomalyKind::DeliveryFailure => "delivery_failure",
            AnomalyKind::TaskPanic => "task_panic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub subject: Option<String>,
    pub channel: Option<String>,
    pub message: String,
    pub correlation_id: Option<String>,
}

pub trait AnomalyReporter: Send + Sync {
    fn report(&self, anomaly: &Anomaly);
}

/// Default reporter: one `error!` line plus a labelled counter.
#[derive(Debug, Default, Clone)]
pub struct LogAnomalyReporter;

impl AnomalyReporter for LogAnomalyReporter {
    fn report(&self, anomaly: &Anomaly) {
        counter!("pipeline_anomalies_total", "kind" => anomaly.kind.as_str()).increment(1);
        tracing::error!(
            target: "anomaly",
            kind = anomaly.kind.as_str(),
            subject = anomaly.subject.as_deref().unwrap_or("-"),
            channel = anomaly.channel.as_deref().unwrap_or("-"),
            correlation_id = anomaly.correlation_id.as_deref().unwrap_or("-"),
            message = %anomaly.message,
            "external failure"
        );
    }
}

/// Call a reporter without letting a misbehaving one unwind into the pipeline.
pub(crate) fn report_quietly(reporter: &dyn AnomalyReporter, anomaly: Anomaly) {
    let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| reporter.report(&anomaly)));
    if res.is_err() {
        tracing::warn!(target: "anomaly", kind = anomaly.kind.as_str(), "anomaly reporter panicked");
    }
}
