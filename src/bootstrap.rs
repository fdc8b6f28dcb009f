// src/bootstrap.rs
//! Wires the pipeline once at startup and hands out `Arc` handles.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::analyze::{build_classifier, build_reviewer, Classifier, SecondaryReviewer};
use crate::config::PipelineConfig;
use crate::notify::{build_channels, Channel, ChannelRuntime, ValidationOutcome};
use crate::pipeline::{
    spawn_sweeper, AnalysisOrchestrator, AnomalyReporter, BackoffRetrier, ChannelDispatcher,
    ConfidenceEnricher, DedupCache, LogAnomalyReporter, OrchestratorSettings,
};

pub struct Pipeline {
    pub config: PipelineConfig,
    pub cache: Arc<DedupCache>,
    pub retrier: Arc<BackoffRetrier>,
    pub enricher: Arc<ConfidenceEnricher>,
    pub dispatcher: Arc<ChannelDispatcher>,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    /// Production wiring: real classifier/reviewer/channels from config.
    pub fn from_config(config: PipelineConfig) -> anyhow::Result<Self> {
        let classifier = build_classifier(&config.ai)?;
        let reviewer = build_reviewer(&config.ai)?;
        let retrier = Arc::new(BackoffRetrier::new(config.base_backoff()));
        let rt = ChannelRuntime::new(&config.channels, retrier, config.max_retry_attempts)?;
        let channels = build_channels(&config.channels, &rt);

        // Safe diagnostics: no secrets, only shape
        info!(
            target: "pipeline",
            enabled = config.enabled,
            enrichment = config.enrichment_enabled,
            reviewer = reviewer.is_some(),
            classifier = classifier.name(),
            timeout_ms = config.subject_timeout_ms,
            threshold = config.confidence_threshold,
            ttl_hours = config.cache_ttl_hours,
            "pipeline config loaded"
        );
        if config.enrichment_enabled && reviewer.is_none() {
            warn!(target: "enrich", "enrichment enabled but no reviewer configured; stage stays off");
        }

        Ok(Self::assemble(
            config,
            classifier,
            reviewer,
            channels,
            Arc::new(LogAnomalyReporter),
        ))
    }

    /// Wire the components around explicit collaborators (tests inject fakes here).
    pub fn assemble(
        config: PipelineConfig,
        classifier: Arc<dyn Classifier>,
        reviewer: Option<Arc<dyn SecondaryReviewer>>,
        channels: Vec<Arc<dyn Channel>>,
        reporter: Arc<dyn AnomalyReporter>,
    ) -> Self {
        let cache = Arc::new(DedupCache::new(config.cache_ttl()));
        let retrier = Arc::new(BackoffRetrier::new(config.base_backoff()));
        let enricher = Arc::new(ConfidenceEnricher::new(
            config.enrichment_enabled,
            reviewer,
            retrier.clone(),
        ));
        let dispatcher = Arc::new(
            ChannelDispatcher::new(channels, reporter.clone())
                .with_send_timeout(config.delivery_timeout()),
        );
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            classifier,
            cache.clone(),
            retrier.clone(),
            enricher.clone(),
            dispatcher.clone(),
            reporter,
            OrchestratorSettings::from_config(&config),
        ));
        Self {
            config,
            cache,
            retrier,
            enricher,
            dispatcher,
            orchestrator,
            sweeper: Mutex::new(None),
        }
    }

    /// Validate channels and start the cache sweeper. Call once, inside the runtime.
    pub async fn start(&self) -> Vec<ValidationOutcome> {
        let report = self.dispatcher.validate_all().await;
        let handle = spawn_sweeper(self.cache.clone(), self.config.sweep_interval());
        if let Some(old) = self.sweeper_slot().replace(handle) {
            old.abort();
        }
        info!(
            target: "pipeline",
            channels = ?self.dispatcher.enabled_channel_names(),
            sweep_secs = self.config.sweep_interval().as_secs(),
            "pipeline started"
        );
        report
    }

    /// Stop the sweeper and drop every cache entry.
    pub fn shutdown(&self) {
        if let Some(h) = self.sweeper_slot().take() {
            h.abort();
        }
        let cleared = self.cache.clear();
        info!(target: "pipeline", cleared, "pipeline shut down");
    }

    pub fn is_running(&self) -> bool {
        self.sweeper_slot().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn sweeper_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.sweeper.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Some(h) = self.sweeper_slot().take() {
            h.abort();
        }
    }
}
