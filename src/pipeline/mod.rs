// src/pipeline/mod.rs
//! Analysis & delivery pipeline: dedup cache, retries, optional enrichment,
//! channel fan-out and the per-subject orchestrator that ties them together.

pub mod anomaly;
pub mod cache;
pub mod dispatcher;
pub mod enricher;
pub mod orchestrator;
pub mod retry;
pub mod types;

pub use anomaly::{Anomaly, AnomalyKind, AnomalyReporter, LogAnomalyReporter};
pub use cache::{spawn_sweeper, CacheStats, DedupCache};
pub use dispatcher::ChannelDispatcher;
pub use enricher::ConfidenceEnricher;
pub use orchestrator::{AnalysisOrchestrator, OrchestratorSettings};
pub use retry::{AttemptError, BackoffRetrier, RetryOutcome};
pub use types::{
    Alert, AnalysisResult, AnalysisStatus, BatchReport, BatchSummary, CachePayload, Category,
    ClassifierSignal, DeliveryOutcome, EnrichmentMetadata,
};
