// src/analyze/mod.rs
//! External AI collaborators: the primary classifier and the secondary reviewer.

pub mod classifier;
pub mod openai;
pub mod reviewer;

use std::sync::Arc;

use anyhow::Result;

pub use classifier::{Classifier, ClassifierContext, MockClassifier, OpenAiClassifier};
pub use reviewer::{OpenAiReviewer, SecondaryReviewer};

use crate::config::AiSettings;

/// Factory: build the classifier according to config.
///
/// * `test_mode` (AI_TEST_MODE=mock) → deterministic mock.
/// * otherwise → OpenAI-compatible client (calls fail fast without a key).
pub fn build_classifier(settings: &AiSettings) -> Result<Arc<dyn Classifier>> {
    if settings.test_mode {
        tracing::info!(target: "pipeline", "classifier: mock (AI_TEST_MODE=mock)");
        return Ok(Arc::new(MockClassifier::default()));
    }
    let c = OpenAiClassifier::new(settings)?;
    if !c.is_configured() {
        tracing::warn!(
            target: "pipeline",
            "classifier has no API key; every analysis will end in ERROR"
        );
    }
    Ok(Arc::new(c))
}

/// The reviewer is only built when it could actually be called.
pub fn build_reviewer(settings: &AiSettings) -> Result<Option<Arc<dyn SecondaryReviewer>>> {
    if settings.test_mode {
        return Ok(None);
    }
    let r = OpenAiReviewer::new(settings)?;
    if !r.is_configured() {
        return Ok(None);
    }
    Ok(Some(Arc::new(r)))
}
