// src/analyze/classifier.rs
//! Primary classifier: subject (+ optional market note) → `ClassifierSignal`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::openai::{extract_json_object, ChatClient};
use crate::config::AiSettings;
use crate::pipeline::types::{Category, ClassifierSignal};

/// Everything the classifier gets to see about one subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierContext {
    pub subject: String,
    pub market_context: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl ClassifierContext {
    pub fn new(subject: &str, market_context: Option<String>) -> Self {
        Self {
            subject: subject.to_string(),
            market_context,
            requested_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// May fail; the orchestrator retries and converts exhaustion into an ERROR result.
    async fn analyze(&self, subject: &str, context: &ClassifierContext)
        -> Result<ClassifierSignal>;
    fn name(&self) -> &str;
}

const SYSTEM_PROMPT: &str = "You are a market news classifier. For the given ticker, assess the most \
important news event of the last 24 hours. Reply with ONLY a JSON object: \
{\"category\": \"A\"|\"B\"|\"C\"|\"D\"|\"NONE\", \"significance\": 0..1, \"sentiment\": -1..1, \
\"headline\": \"<one line>\", \"sources\": [\"<url>\", ...]}. \
Use NONE when nothing alert-worthy happened.";

/// Chat-completions backed classifier.
pub struct OpenAiClassifier {
    chat: ChatClient,
}

impl OpenAiClassifier {
    pub fn new(settings: &AiSettings) -> Result<Self> {
        Ok(Self {
            chat: ChatClient::new(settings, &settings.classifier_model)?,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.chat.is_configured()
    }
}

fn user_prompt(subject: &str, ctx: &ClassifierContext) -> String {
    let mut p = format!(
        "Ticker: {subject}\nAs of: {}",
        ctx.requested_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(note) = ctx.market_context.as_deref().filter(|n| !n.trim().is_empty()) {
        p.push_str("\nMarket context: ");
        p.push_str(note.trim());
    }
    p
}

/// Parse a model reply into a normalized signal.
pub fn parse_signal(raw: &str) -> Result<ClassifierSignal> {
    let json = extract_json_object(raw).context("classifier reply contained no JSON object")?;
    let sig: ClassifierSignal =
        serde_json::from_str(json).context("classifier reply did not match the signal shape")?;
    Ok(sig.normalized())
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn analyze(
        &self,
        subject: &str,
        context: &ClassifierContext,
    ) -> Result<ClassifierSignal> {
        let reply = self
            .chat
            .complete(SYSTEM_PROMPT, &user_prompt(subject, context), 400)
            .await?;
        parse_signal(&reply)
    }

    fn name(&self) -> &str {
        self.chat.model()
    }
}

/// Deterministic classifier for `AI_TEST_MODE=mock` and local runs.
#[derive(Debug, Clone)]
pub struct MockClassifier {
    pub category: Category,
    pub significance: f64,
    pub sentiment: f64,
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self {
            category: Category::A,
            significance: 0.8,
            sentiment: 0.7,
        }
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    async fn analyze(
        &self,
        subject: &str,
        _context: &ClassifierContext,
    ) -> Result<ClassifierSignal> {
        Ok(ClassifierSignal {
            category: self.category,
            significance: self.significance,
            sentiment: self.sentiment,
            headline: format!("Mock headline for {subject}"),
            sources: vec![format!("https://example.com/news/{}", subject.to_lowercase())],
        }
        .normalized())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
