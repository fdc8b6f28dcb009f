// tests/common/mod.rs
//
// In-process fakes shared by the integration tests: a classifier scripted per
// subject, a fixed-reply reviewer, channels that always succeed or fail, and an
// anomaly recorder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use ticker_alert_pipeline::analyze::{Classifier, ClassifierContext, SecondaryReviewer};
use ticker_alert_pipeline::notify::{Channel, ValidationOutcome};
use ticker_alert_pipeline::pipeline::{
    Alert, Anomaly, AnomalyReporter, Category, ClassifierSignal, DeliveryOutcome,
};
use ticker_alert_pipeline::{Pipeline, PipelineConfig};

/// What the scripted classifier does for one subject.
#[derive(Clone)]
pub enum Script {
    Signal(ClassifierSignal),
    Fail,
    Panic,
    Sleep(Duration),
}

pub fn signal(category: Category, significance: f64, sentiment: f64) -> ClassifierSignal {
    ClassifierSignal {
        category,
        significance,
        sentiment,
        headline: "Quarterly results beat estimates".into(),
        sources: vec!["https://news.example/item".into()],
    }
}

/// Subjects without a script get a qualifying (A, 0.8, 0.7) signal.
#[derive(Default)]
pub struct ScriptedClassifier {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, subject: &str, script: Script) -> Self {
        self.scripts.insert(subject.to_string(), script);
        self
    }

    pub fn calls(&self, subject: &str) -> usize {
        self.calls.lock().unwrap().get(subject).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn analyze(&self, subject: &str, _ctx: &ClassifierContext) -> Result<ClassifierSignal> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(subject.to_string())
            .or_default() += 1;
        match self.scripts.get(subject).cloned() {
            Some(Script::Signal(s)) => Ok(s),
            Some(Script::Fail) => Err(anyhow!("classifier unavailable for {subject}")),
            Some(Script::Panic) => panic!("classifier exploded on {subject}"),
            Some(Script::Sleep(d)) => {
                tokio::time::sleep(d).await;
                Ok(signal(Category::A, 0.8, 0.7))
            }
            None => Ok(signal(Category::A, 0.8, 0.7)),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub struct FixedReviewer {
    pub reply: String,
}

impl FixedReviewer {
    pub fn confidence(c: f64) -> Self {
        Self {
            reply: format!(r#"{{"confidence": {c}, "reasoning": "reviewed"}}"#),
        }
    }
}

#[async_trait]
impl SecondaryReviewer for FixedReviewer {
    async fn review(&self, _prompt: &str) -> Result<String> {
        Ok(self.reply.clone())
    }
    fn model_name(&self) -> &str {
        "fixed-reviewer"
    }
    fn is_configured(&self) -> bool {
        true
    }
}

/// Answers with a qualifying confidence, but only after `delay`.
pub struct SlowReviewer {
    pub delay: Duration,
}

#[async_trait]
impl SecondaryReviewer for SlowReviewer {
    async fn review(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(r#"{"confidence": 0.71, "reasoning": "late"}"#.to_string())
    }
    fn model_name(&self) -> &str {
        "slow-reviewer"
    }
    fn is_configured(&self) -> bool {
        true
    }
}

/// Blows up as soon as the pipeline asks whether it is usable. That check runs
/// on the subject task outside any panic guard, so the whole task dies.
pub struct ExplodingReviewer;

#[async_trait]
impl SecondaryReviewer for ExplodingReviewer {
    async fn review(&self, _prompt: &str) -> Result<String> {
        Ok(String::new())
    }
    fn model_name(&self) -> &str {
        "exploding-reviewer"
    }
    fn is_configured(&self) -> bool {
        panic!("reviewer configuration check exploded")
    }
}

pub struct FakeChannel {
    pub name: &'static str,
    pub succeed: bool,
    pub sent: Mutex<Vec<Alert>>,
    pub sends: AtomicUsize,
}

impl FakeChannel {
    pub fn ok(name: &'static str) -> Arc<Self> {
        Self::build(name, true)
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Self::build(name, false)
    }

    fn build(name: &'static str, succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            succeed,
            sent: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
        })
    }

    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn name(&self) -> &str {
        self.name
    }
    fn is_enabled(&self) -> bool {
        true
    }
    async fn validate(&self) -> ValidationOutcome {
        ValidationOutcome::ok(self.name)
    }
    async fn send(&self, alert: &Alert) -> DeliveryOutcome {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(alert.clone());
        if self.succeed {
            DeliveryOutcome {
                channel_name: self.name.to_string(),
                success: true,
                message_id: Some(format!("{}-1", self.name)),
                error: None,
                attempt_count: 1,
                duration_ms: 0,
            }
        } else {
            DeliveryOutcome::failed(self.name, "HTTP 503 Service Unavailable", 3, 0)
        }
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    pub seen: Mutex<Vec<Anomaly>>,
}

impl RecordingReporter {
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl AnomalyReporter for RecordingReporter {
    fn report(&self, anomaly: &Anomaly) {
        self.seen.lock().unwrap().push(anomaly.clone());
    }
}

/// Fast settings: 1ms backoff, short deadline.
pub fn fast_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.base_backoff_ms = 1;
    cfg.subject_timeout_ms = 500;
    cfg
}

pub fn build_pipeline(
    cfg: PipelineConfig,
    classifier: Arc<dyn Classifier>,
    reviewer: Option<Arc<dyn SecondaryReviewer>>,
    channels: Vec<Arc<dyn Channel>>,
    reporter: Arc<dyn AnomalyReporter>,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::assemble(cfg, classifier, reviewer, channels, reporter))
}
