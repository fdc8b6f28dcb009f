// src/analyze/reviewer.rs
use anyhow::Result;
use async_trait::async_trait;

use super::openai::ChatClient;
use crate::config::AiSettings;

/// Second opinion on a classifier signal. Returns the raw reply; the
/// enricher owns parsing of `{confidence, reasoning}`.
#[async_trait]
pub trait SecondaryReviewer: Send + Sync {
    async fn review(&self, prompt: &str) -> Result<String>;
    fn model_name(&self) -> &str;
    /// Credentials present; a reviewer that is not configured is never called.
    fn is_configured(&self) -> bool;
}

const SYSTEM_PROMPT: &str = "You are a skeptical senior market analyst reviewing an automated \
news alert. Judge how confident we should be that this event is real, material and correctly \
characterized. Reply with ONLY a JSON object: {\"confidence\": 0..1, \"reasoning\": \"<short>\"}.";

pub struct OpenAiReviewer {
    chat: ChatClient,
}

impl OpenAiReviewer {
    pub fn new(settings: &AiSettings) -> Result<Self> {
        Ok(Self {
            chat: ChatClient::new(settings, &settings.reviewer_model)?,
        })
    }
}

#[async_trait]
impl SecondaryReviewer for OpenAiReviewer {
    async fn review(&self, prompt: &str) -> Result<String> {
        self.chat.complete(SYSTEM_PROMPT, prompt, 300).await
    }

    fn model_name(&self) -> &str {
        self.chat.model()
    }

    fn is_configured(&self) -> bool {
        self.chat.is_configured()
    }
}
