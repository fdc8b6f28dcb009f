// src/pipeline/types.rs
//! Data model shared by every pipeline stage.
//!
//! Everything here is plain data: signals coming out of the classifier, the
//! alert built from them, per-channel delivery outcomes and the per-subject /
//! per-batch results returned to callers. Results are immutable once returned.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of event categories the classifier may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "A", alias = "a")]
    A,
    #[serde(rename = "B", alias = "b")]
    B,
    #[serde(rename = "C", alias = "c")]
    C,
    #[serde(rename = "D", alias = "d")]
    D,
    /// No alert-worthy event.
    #[serde(rename = "NONE", alias = "none", alias = "None")]
    NoEvent,
}

impl Category {
    /// Every category, alert-worthy ones first.
    pub const ALL: [Category; 5] = [
        Category::A,
        Category::B,
        Category::C,
        Category::D,
        Category::NoEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
            Category::C => "C",
            Category::D => "D",
            Category::NoEvent => "NONE",
        }
    }

    pub fn is_event(&self) -> bool {
        !matches!(self, Category::NoEvent)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the external classifier for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSignal {
    pub category: Category,
    /// 0.0 .. 1.0
    pub significance: f64,
    /// -1.0 .. 1.0
    pub sentiment: f64,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl ClassifierSignal {
    /// Clamp numeric fields into their documented ranges. Non-finite values become 0.
    pub fn normalized(mut self) -> Self {
        fn finite_or_zero(x: f64) -> f64 {
            if x.is_finite() {
                x
            } else {
                0.0
            }
        }
        self.significance = finite_or_zero(self.significance).clamp(0.0, 1.0);
        self.sentiment = finite_or_zero(self.sentiment).clamp(-1.0, 1.0);
        self.headline = self.headline.trim().to_string();
        self.sources.retain(|s| !s.trim().is_empty());
        self
    }

    /// Primary confidence derived from the signal.
    pub fn confidence(&self) -> f64 {
        primary_confidence(self.significance, self.sentiment)
    }
}

/// `clamp(0.6 * significance + 0.4 * |sentiment|, 0, 1)`
pub fn primary_confidence(significance: f64, sentiment: f64) -> f64 {
    (0.6 * significance + 0.4 * sentiment.abs()).clamp(0.0, 1.0)
}

/// Result of a successful secondary review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentMetadata {
    pub original_confidence: f64,
    /// Always `min(original_confidence, reviewer confidence)`.
    pub enriched_confidence: f64,
    pub applied: bool,
    pub reasoning_excerpt: String,
    pub reviewer_model_name: String,
}

/// A qualifying alert. Built once, replayed verbatim from the dedup cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub subject: String,
    pub category: Category,
    pub headline: String,
    pub sentiment: f64,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub formatted_message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichmentMetadata>,
}

impl Alert {
    /// Build an alert from a signal that already passed the confidence gate.
    pub fn from_signal(
        subject: &str,
        signal: &ClassifierSignal,
        confidence: f64,
        enrichment: Option<EnrichmentMetadata>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let formatted_message = render_message(subject, signal, confidence);
        Self {
            subject: subject.to_string(),
            category: signal.category,
            headline: signal.headline.clone(),
            sentiment: signal.sentiment,
            confidence,
            sources: signal.sources.clone(),
            formatted_message,
            created_at,
            enrichment,
        }
    }

    /// Free-text alert submitted by an operator (`POST /alert`).
    pub fn manual(text: &str, formatted_message: String, created_at: DateTime<Utc>) -> Self {
        Self {
            subject: "MANUAL".to_string(),
            category: Category::NoEvent,
            headline: text.to_string(),
            sentiment: 0.0,
            confidence: 1.0,
            sources: Vec::new(),
            formatted_message,
            created_at,
            enrichment: None,
        }
    }
}

/// Plain-text rendering; channels apply their own markup/escaping on top.
fn render_message(subject: &str, signal: &ClassifierSignal, confidence: f64) -> String {
    let direction = if signal.sentiment > 0.0 {
        "positive"
    } else if signal.sentiment < 0.0 {
        "negative"
    } else {
        "neutral"
    };
    let mut out = format!(
        "[{}] {}: {}\nSentiment: {:+.2} ({})\nConfidence: {:.0}%",
        signal.category,
        subject,
        if signal.headline.is_empty() {
            "(no headline)"
        } else {
            signal.headline.as_str()
        },
        signal.sentiment,
        direction,
        confidence * 100.0
    );
    if !signal.sources.is_empty() {
        out.push_str("\nSources:");
        for s in signal.sources.iter().take(5) {
            out.push_str("\n- ");
            out.push_str(s);
        }
    }
    out
}

/// One per enabled channel per alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub channel_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_count: u32,
    pub duration_ms: u64,
}

impl DeliveryOutcome {
    pub fn failed(
        channel_name: &str,
        error: impl Into<String>,
        attempt_count: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            success: false,
            message_id: None,
            error: Some(error.into()),
            attempt_count,
            duration_ms,
        }
    }
}

/// What the dedup cache stores for one (subject, category).
/// `alert == None` is the "analyzed, nothing to send" marker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CachePayload {
    pub alert: Option<Alert>,
    pub delivery_outcomes: Vec<DeliveryOutcome>,
}

impl CachePayload {
    pub fn no_alert() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisStatus {
    Analyzed,
    Cached,
    Timeout,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Analyzed => "ANALYZED",
            AnalysisStatus::Cached => "CACHED",
            AnalysisStatus::Timeout => "TIMEOUT",
            AnalysisStatus::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub subject: String,
    pub status: AnalysisStatus,
    pub alert: Option<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_outcomes: Option<Vec<DeliveryOutcome>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub cached: bool,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub analyzed: usize,
    pub cached: usize,
    pub timed_out: usize,
    pub errored: usize,
    /// Fresh alerts dispatched in this batch (cache replays are not counted).
    pub alerts_sent: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let mut s = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match r.status {
                AnalysisStatus::Analyzed => {
                    s.analyzed += 1;
                    if r.alert.is_some() {
                        s.alerts_sent += 1;
                    }
                }
                AnalysisStatus::Cached => s.cached += 1,
                AnalysisStatus::Timeout => s.timed_out += 1,
                AnalysisStatus::Error => s.errored += 1,
            }
        }
        s
    }

    /// True when at least one subject timed out or errored.
    pub fn is_partial(&self) -> bool {
        self.timed_out + self.errored > 0
    }
}

/// Everything `analyze_batch` hands back.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<AnalysisResult>,
    pub summary: BatchSummary,
    pub total_duration_ms: u64,
    pub correlation_id: String,
}
