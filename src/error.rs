// src/error.rs
//! Failure taxonomy. Only `Validation` ever reaches an HTTP status; the rest
//! are folded into `AnalysisResult` / `DeliveryOutcome` at task boundaries.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("analysis exceeded {}ms deadline", .0.as_millis())]
    Timeout(Duration),

    #[error("{stage} failed: {message}")]
    External { stage: &'static str, message: String },

    #[error("channel {channel} misconfigured: {message}")]
    Configuration { channel: String, message: String },
}

impl PipelineError {
    pub fn external(stage: &'static str, message: impl Into<String>) -> Self {
        PipelineError::External {
            stage,
            message: message.into(),
        }
    }

    /// Whether the failure came from outside the process.
    pub fn is_external(&self) -> bool {
        matches!(self, PipelineError::External { .. })
    }
}
