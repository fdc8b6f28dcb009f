// src/pipeline/orchestrator.rs
//! Per-subject state machine and batch fan-out.
//!
//! ```text
//! cache lookup ─hit──▶ CACHED
//!      │ miss
//! classify (retried, raced against the deadline) ──deadline──▶ TIMEOUT
//!      │                                          ──exhausted─▶ ERROR
//! gate: NONE or confidence < threshold ──▶ cache null marker, ANALYZED
//!      │
//! enrich (optional, within what is left of the deadline)
//!      │                 ── lowered below threshold ──▶ ANALYZED (no alert)
//!      │
//! build alert → dispatch → cache {alert, outcomes} → ANALYZED
//! ```
//!
//! Dispatch is not raced against the deadline; each channel send has its own
//! cap in the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use metrics::{counter, histogram};
use tracing::Instrument;
use uuid::Uuid;

use super::anomaly::{report_quietly, Anomaly, AnomalyKind, AnomalyReporter};
use super::cache::DedupCache;
use super::dispatcher::ChannelDispatcher;
use super::enricher::ConfidenceEnricher;
use super::retry::BackoffRetrier;
use super::types::{
    Alert, AnalysisResult, AnalysisStatus, BatchReport, BatchSummary, CachePayload, Category,
    DeliveryOutcome,
};
use crate::analyze::{Classifier, ClassifierContext};
use crate::config::PipelineConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub confidence_threshold: f64,
    pub subject_timeout: Duration,
    pub max_attempts: u32,
    pub market_context: Option<String>,
    pub cache_enrichment_suppressed: bool,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            confidence_threshold: cfg.confidence_threshold,
            subject_timeout: cfg.subject_timeout(),
            max_attempts: cfg.max_retry_attempts,
            market_context: cfg.market_context.clone(),
            cache_enrichment_suppressed: cfg.cache_enrichment_suppressed,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

pub struct AnalysisOrchestrator {
    classifier: Arc<dyn Classifier>,
    cache: Arc<DedupCache>,
    retrier: Arc<BackoffRetrier>,
    enricher: Arc<ConfidenceEnricher>,
    dispatcher: Arc<ChannelDispatcher>,
    reporter: Arc<dyn AnomalyReporter>,
    settings: OrchestratorSettings,
}

impl AnalysisOrchestrator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        cache: Arc<DedupCache>,
        retrier: Arc<BackoffRetrier>,
        enricher: Arc<ConfidenceEnricher>,
        dispatcher: Arc<ChannelDispatcher>,
        reporter: Arc<dyn AnomalyReporter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            classifier,
            cache,
            retrier,
            enricher,
            dispatcher,
            reporter,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run every subject as its own task. Always returns one result per input,
    /// in input order; a panicked task becomes an ERROR result.
    pub async fn analyze_batch(self: &Arc<Self>, subjects: Vec<String>) -> BatchReport {
        let started = Instant::now();
        let correlation_id = Uuid::new_v4().to_string();
        tracing::info!(
            target: "pipeline",
            correlation_id = %correlation_id,
            subjects = subjects.len(),
            "batch started"
        );

        let handles: Vec<_> = subjects
            .iter()
            .map(|subject| {
                let this = Arc::clone(self);
                let subject = subject.clone();
                let cid = correlation_id.clone();
                tokio::spawn(async move { this.analyze_subject(&subject, &cid).await })
            })
            .collect();

        let joined = join_all(handles).await;
        let results: Vec<AnalysisResult> = subjects
            .into_iter()
            .zip(joined)
            .map(|(subject, res)| match res {
                Ok(result) => result,
                Err(join_err) => {
                    let message = if join_err.is_panic() {
                        "subject task panicked".to_string()
                    } else {
                        format!("subject task aborted: {join_err}")
                    };
                    report_quietly(
                        self.reporter.as_ref(),
                        Anomaly {
                            kind: AnomalyKind::TaskPanic,
                            subject: Some(subject.clone()),
                            channel: None,
                            message: message.clone(),
                            correlation_id: Some(correlation_id.clone()),
                        },
                    );
                    counter!("pipeline_subjects_total", "status" => AnalysisStatus::Error.as_str())
                        .increment(1);
                    AnalysisResult {
                        subject,
                        status: AnalysisStatus::Error,
                        alert: None,
                        delivery_outcomes: None,
                        error: Some(message),
                        duration_ms: elapsed_ms(started),
                        cached: false,
                        correlation_id: correlation_id.clone(),
                    }
                }
            })
            .collect();

        let summary = BatchSummary::from_results(&results);
        let total_duration_ms = elapsed_ms(started);
        tracing::info!(
            target: "pipeline",
            correlation_id = %correlation_id,
            total = summary.total,
            analyzed = summary.analyzed,
            cached = summary.cached,
            timed_out = summary.timed_out,
            errored = summary.errored,
            alerts_sent = summary.alerts_sent,
            duration_ms = total_duration_ms,
            "batch finished"
        );
        BatchReport {
            results,
            summary,
            total_duration_ms,
            correlation_id,
        }
    }

    /// Analyze one subject to a terminal status. Never fails.
    pub async fn analyze_subject(&self, subject: &str, correlation_id: &str) -> AnalysisResult {
        let started = Instant::now();
        let span = tracing::info_span!("subject", subject, correlation_id);
        let mut result = self
            .run(subject, correlation_id, started)
            .instrument(span)
            .await;
        result.duration_ms = elapsed_ms(started);

        counter!("pipeline_subjects_total", "status" => result.status.as_str()).increment(1);
        histogram!("pipeline_subject_duration_ms").record(result.duration_ms as f64);
        result
    }

    async fn run(&self, subject: &str, correlation_id: &str, started: Instant) -> AnalysisResult {
        let done = |status: AnalysisStatus,
                    alert: Option<Alert>,
                    outcomes: Option<Vec<DeliveryOutcome>>,
                    error: Option<String>| AnalysisResult {
            subject: subject.to_string(),
            status,
            alert,
            delivery_outcomes: outcomes,
            error,
            duration_ms: elapsed_ms(started),
            cached: status == AnalysisStatus::Cached,
            correlation_id: correlation_id.to_string(),
        };

        // 1) dedup
        if let Some((category, payload)) = self.lookup_cached(subject) {
            tracing::info!(target: "pipeline", category = %category, "cache hit; replaying");
            let outcomes = payload.alert.as_ref().map(|_| payload.delivery_outcomes);
            return done(AnalysisStatus::Cached, payload.alert, outcomes, None);
        }

        // 2) classify under the deadline; a dropped future writes nothing
        let ctx = ClassifierContext::new(subject, self.settings.market_context.clone());
        let classifier = self.classifier.as_ref();
        let ctx_ref = &ctx;
        let classify = self.retrier.execute(
            move || classifier.analyze(subject, ctx_ref),
            self.settings.max_attempts,
        );
        let outcome = match tokio::time::timeout(self.settings.subject_timeout, classify).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = PipelineError::Timeout(self.settings.subject_timeout);
                tracing::warn!(target: "pipeline", error = %err, "subject timed out");
                return done(AnalysisStatus::Timeout, None, None, Some(err.to_string()));
            }
        };
        let signal = match outcome.result {
            Ok(signal) => signal.normalized(),
            Err(e) => {
                let err = PipelineError::external("classifier", e.to_string());
                report_quietly(
                    self.reporter.as_ref(),
                    Anomaly {
                        kind: AnomalyKind::ClassifierFailure,
                        subject: Some(subject.to_string()),
                        channel: None,
                        message: format!("{err} after {} attempt(s)", outcome.attempt_count),
                        correlation_id: Some(correlation_id.to_string()),
                    },
                );
                return done(AnalysisStatus::Error, None, None, Some(err.to_string()));
            }
        };

        // 3) primary gate
        let threshold = self.settings.confidence_threshold;
        let primary = signal.confidence();
        if !signal.category.is_event() || primary < threshold {
            tracing::info!(
                target: "pipeline",
                category = %signal.category,
                confidence = primary,
                threshold,
                "below gate; caching no-alert marker"
            );
            self.cache.set(subject, signal.category, CachePayload::no_alert());
            return done(AnalysisStatus::Analyzed, None, None, None);
        }

        // 4) optional enrichment, may only lower confidence
        let enrichment = if self.enricher.is_enabled() {
            let remaining = self.settings.subject_timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, self.enricher.enrich(subject, &signal)).await {
                Ok(meta) => meta,
                Err(_) => {
                    tracing::warn!(
                        target: "enrich",
                        remaining_ms = remaining.as_millis() as u64,
                        "secondary review ran past the deadline; keeping primary confidence"
                    );
                    None
                }
            }
        } else {
            None
        };
        let confidence = enrichment
            .as_ref()
            .map_or(primary, |m| m.enriched_confidence);
        if confidence < threshold {
            tracing::info!(
                target: "pipeline",
                primary,
                enriched = confidence,
                threshold,
                "secondary review suppressed alert"
            );
            if self.settings.cache_enrichment_suppressed {
                self.cache.set(subject, signal.category, CachePayload::no_alert());
            }
            return done(AnalysisStatus::Analyzed, None, None, None);
        }

        // 5) alert, dispatch, remember
        let alert = Alert::from_signal(subject, &signal, confidence, enrichment, Utc::now());
        let outcomes: Vec<DeliveryOutcome> = self
            .dispatcher
            .dispatch_correlated(&alert, Some(correlation_id))
            .await;
        counter!("pipeline_alerts_sent_total").increment(1);
        tracing::info!(
            target: "pipeline",
            category = %alert.category,
            confidence,
            delivered = outcomes.iter().filter(|o| o.success).count(),
            channels = outcomes.len(),
            "alert dispatched"
        );
        self.cache.set(
            subject,
            alert.category,
            CachePayload {
                alert: Some(alert.clone()),
                delivery_outcomes: outcomes.clone(),
            },
        );
        done(AnalysisStatus::Analyzed, Some(alert), Some(outcomes), None)
    }

    /// Any live entry for the subject, whatever its category.
    fn lookup_cached(&self, subject: &str) -> Option<(Category, CachePayload)> {
        self.cache.get_any(subject, &Category::ALL)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::MockClassifier;
    use crate::pipeline::anomaly::LogAnomalyReporter;
    use crate::pipeline::types::ClassifierSignal;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Failing(AtomicU32);

    #[async_trait]
    impl Classifier for Failing {
        async fn analyze(&self, _s: &str, _c: &ClassifierContext) -> Result<ClassifierSignal> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("upstream 503"))
        }
        fn name(&self) -> &str {
            "failing"
        }
    }

    fn orchestrator(classifier: Arc<dyn Classifier>) -> (Arc<AnalysisOrchestrator>, Arc<DedupCache>) {
        let cache = Arc::new(DedupCache::new(Duration::from_secs(3600)));
        let retrier = Arc::new(BackoffRetrier::new(Duration::from_millis(1)));
        let reporter: Arc<dyn AnomalyReporter> = Arc::new(LogAnomalyReporter);
        let enricher = Arc::new(ConfidenceEnricher::new(false, None, retrier.clone()));
        let dispatcher = Arc::new(ChannelDispatcher::new(Vec::new(), reporter.clone()));
        let o = AnalysisOrchestrator::new(
            classifier,
            cache.clone(),
            retrier,
            enricher,
            dispatcher,
            reporter,
            OrchestratorSettings::default(),
        );
        (Arc::new(o), cache)
    }

    #[tokio::test]
    async fn qualifying_signal_builds_alert_then_replays() {
        let (o, cache) = orchestrator(Arc::new(MockClassifier::default()));
        let first = o.analyze_subject("ACME", "c-1").await;
        assert_eq!(first.status, AnalysisStatus::Analyzed);
        let alert = first.alert.clone().unwrap();
        assert!((alert.confidence - 0.76).abs() < 1e-9);
        assert_eq!(first.delivery_outcomes.as_deref(), Some(&[][..]));
        assert_eq!(cache.len(), 1);

        let second = o.analyze_subject("ACME", "c-2").await;
        assert_eq!(second.status, AnalysisStatus::Cached);
        assert!(second.cached);
        assert_eq!(second.alert, Some(alert));

        // one miss for the fresh run, one hit for the replay
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn none_category_caches_marker() {
        let mock = MockClassifier {
            category: Category::NoEvent,
            ..Default::default()
        };
        let (o, cache) = orchestrator(Arc::new(mock));
        let r = o.analyze_subject("ACME", "c").await;
        assert_eq!(r.status, AnalysisStatus::Analyzed);
        assert!(r.alert.is_none());
        assert_eq!(cache.get("ACME", Category::NoEvent), Some(CachePayload::no_alert()));
        assert_eq!(o.analyze_subject("ACME", "c").await.status, AnalysisStatus::Cached);
    }

    #[tokio::test]
    async fn low_confidence_is_gated() {
        let mock = MockClassifier {
            category: Category::C,
            significance: 0.5,
            sentiment: 0.2,
        };
        let (o, _) = orchestrator(Arc::new(mock));
        let r = o.analyze_subject("ACME", "c").await;
        assert_eq!(r.status, AnalysisStatus::Analyzed);
        assert!(r.alert.is_none());
    }

    #[tokio::test]
    async fn exhausted_classifier_is_error_and_uncached() {
        let failing = Arc::new(Failing(AtomicU32::new(0)));
        let (o, cache) = orchestrator(failing.clone());
        let r = o.analyze_subject("ACME", "c").await;
        assert_eq!(r.status, AnalysisStatus::Error);
        assert!(r.error.as_deref().unwrap().contains("upstream 503"));
        assert_eq!(failing.0.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn batch_preserves_order_and_shares_correlation_id() {
        let (o, _) = orchestrator(Arc::new(MockClassifier::default()));
        let report = o
            .analyze_batch(vec!["AAA".into(), "BBB".into(), "CCC".into()])
            .await;
        let names: Vec<_> = report.results.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(names, ["AAA", "BBB", "CCC"]);
        assert!(report
            .results
            .iter()
            .all(|r| r.correlation_id == report.correlation_id));
        assert_eq!(report.summary.analyzed, 3);
        assert_eq!(report.summary.alerts_sent, 3);
    }
}
