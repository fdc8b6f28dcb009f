// src/pipeline/enricher.rs
//! Optional secondary review of a classifier signal.
//!
//! The review can only ever LOWER confidence: the enriched value is
//! `min(primary, reviewer)`. Any failure (reviewer unreachable, retries
//! exhausted, unparsable reply) yields `None` so the caller keeps the primary
//! confidence; enrichment trouble never suppresses an alert on its own.

use std::sync::Arc;

use metrics::counter;
use serde::Deserialize;

use super::retry::BackoffRetrier;
use super::types::{ClassifierSignal, EnrichmentMetadata};
use crate::analyze::openai::extract_json_object;
use crate::analyze::SecondaryReviewer;

pub const REVIEW_ATTEMPTS: u32 = 3;
pub const REASONING_EXCERPT_CHARS: usize = 500;

pub struct ConfidenceEnricher {
    enabled: bool,
    reviewer: Option<Arc<dyn SecondaryReviewer>>,
    retrier: Arc<BackoffRetrier>,
}

impl ConfidenceEnricher {
    pub fn new(
        enabled: bool,
        reviewer: Option<Arc<dyn SecondaryReviewer>>,
        retrier: Arc<BackoffRetrier>,
    ) -> Self {
        Self {
            enabled,
            reviewer,
            retrier,
        }
    }

    /// Flag on AND a configured reviewer.
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.reviewer.as_ref().is_some_and(|r| r.is_configured())
    }

    pub async fn enrich(&self, subject: &str, signal: &ClassifierSignal) -> Option<EnrichmentMetadata> {
        if !self.is_enabled() {
            return None;
        }
        let reviewer = self.reviewer.as_deref()?;
        let original = signal.confidence();
        let prompt = build_review_prompt(subject, signal, original);
        let prompt = prompt.as_str();

        let out = self
            .retrier
            .execute(move || reviewer.review(prompt), REVIEW_ATTEMPTS)
            .await;

        let raw = match out.result {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    target: "enrich",
                    subject,
                    attempts = out.attempt_count,
                    error = %e,
                    "secondary review unavailable; keeping primary confidence"
                );
                return None;
            }
        };

        let Some(reply) = parse_review(&raw) else {
            tracing::warn!(target: "enrich", subject, "unparsable secondary review");
            return None;
        };

        let enriched = conservative(original, reply.confidence);
        counter!("enrichment_applied_total").increment(1);
        tracing::info!(
            target: "enrich",
            subject,
            original,
            secondary = reply.confidence,
            enriched,
            "secondary review applied"
        );
        Some(EnrichmentMetadata {
            original_confidence: original,
            enriched_confidence: enriched,
            applied: true,
            reasoning_excerpt: excerpt(&reply.reasoning, REASONING_EXCERPT_CHARS),
            reviewer_model_name: reviewer.model_name().to_string(),
        })
    }
}

/// Never overstate: the lower of the two estimates wins.
pub fn conservative(primary: f64, secondary: f64) -> f64 {
    primary.min(secondary)
}

pub fn build_review_prompt(subject: &str, signal: &ClassifierSignal, primary: f64) -> String {
    let mut p = format!(
        "Subject: {subject}\nCategory: {}\nHeadline: {}\nSignificance: {:.2}\nSentiment: {:+.2}\nPrimary confidence: {:.2}",
        signal.category, signal.headline, signal.significance, signal.sentiment, primary
    );
    if signal.sources.is_empty() {
        p.push_str("\nSources: none cited");
    } else {
        p.push_str("\nSources:");
        for s in &signal.sources {
            p.push_str("\n- ");
            p.push_str(s);
        }
    }
    p.push_str("\n\nRespond with JSON {\"confidence\": <0..1>, \"reasoning\": \"...\"}.");
    p
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReviewReply {
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

/// `None` when the reply has no JSON, the wrong shape, or a confidence outside [0, 1].
pub(crate) fn parse_review(raw: &str) -> Option<ReviewReply> {
    let json = extract_json_object(raw)?;
    let reply: ReviewReply = serde_json::from_str(json).ok()?;
    if !reply.confidence.is_finite() || !(0.0..=1.0).contains(&reply.confidence) {
        return None;
    }
    Some(reply)
}

fn excerpt(s: &str, max_chars: usize) -> String {
    s.trim().chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Category;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FixedReviewer {
        reply: Option<String>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SecondaryReviewer for FixedReviewer {
        async fn review(&self, _prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().ok_or_else(|| anyhow!("reviewer down"))
        }
        fn model_name(&self) -> &str {
            "review-model"
        }
        fn is_configured(&self) -> bool {
            true
        }
    }

    fn signal(significance: f64, sentiment: f64) -> ClassifierSignal {
        ClassifierSignal {
            category: Category::A,
            significance,
            sentiment,
            headline: "Merger talks confirmed".into(),
            sources: vec!["https://news.example/1".into()],
        }
    }

    fn enricher(reply: Option<&str>) -> (ConfidenceEnricher, Arc<FixedReviewer>) {
        let reviewer = Arc::new(FixedReviewer {
            reply: reply.map(str::to_string),
            calls: AtomicU32::new(0),
        });
        let e = ConfidenceEnricher::new(
            true,
            Some(reviewer.clone() as Arc<dyn SecondaryReviewer>),
            Arc::new(BackoffRetrier::new(Duration::from_millis(1))),
        );
        (e, reviewer)
    }

    #[test]
    fn conservative_selection_takes_the_minimum() {
        assert_eq!(conservative(0.9, 0.7), 0.7);
        assert_eq!(conservative(0.5, 1.0), 0.5);
        assert_eq!(conservative(0.5, 0.5), 0.5);
    }

    #[tokio::test]
    async fn lower_secondary_wins() {
        // significance 1.0, sentiment 0.75 → primary 0.9
        let (e, _) = enricher(Some(r#"{"confidence":0.7,"reasoning":"single source"}"#));
        let meta = e.enrich("ACME", &signal(1.0, 0.75)).await.unwrap();
        assert!((meta.original_confidence - 0.9).abs() < 1e-9);
        assert!((meta.enriched_confidence - 0.7).abs() < 1e-9);
        assert!(meta.applied);
        assert_eq!(meta.reviewer_model_name, "review-model");
        assert_eq!(meta.reasoning_excerpt, "single source");
    }

    #[tokio::test]
    async fn higher_secondary_never_raises() {
        // significance 0.5, sentiment 0.5 → primary 0.5
        let (e, _) = enricher(Some(r#"{"confidence":1.0,"reasoning":"solid"}"#));
        let meta = e.enrich("ACME", &signal(0.5, 0.5)).await.unwrap();
        assert!((meta.enriched_confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn failures_yield_none_not_zero() {
        let (e, reviewer) = enricher(None);
        assert!(e.enrich("ACME", &signal(0.9, 0.9)).await.is_none());
        assert_eq!(reviewer.calls.load(Ordering::SeqCst), REVIEW_ATTEMPTS);

        let (e, _) = enricher(Some("I think it is fine"));
        assert!(e.enrich("ACME", &signal(0.9, 0.9)).await.is_none());

        let (e, _) = enricher(Some(r#"{"confidence": 7, "reasoning": "out of range"}"#));
        assert!(e.enrich("ACME", &signal(0.9, 0.9)).await.is_none());
    }

    #[tokio::test]
    async fn reasoning_is_capped() {
        let long = "x".repeat(2000);
        let reply = format!(r#"{{"confidence":0.3,"reasoning":"{long}"}}"#);
        let (e, _) = enricher(Some(&reply));
        let meta = e.enrich("ACME", &signal(0.9, 0.9)).await.unwrap();
        assert_eq!(meta.reasoning_excerpt.chars().count(), REASONING_EXCERPT_CHARS);
    }

    #[test]
    fn disabled_without_flag_or_reviewer() {
        let retrier = Arc::new(BackoffRetrier::new(Duration::from_millis(1)));
        assert!(!ConfidenceEnricher::new(true, None, retrier.clone()).is_enabled());
        let (on, reviewer) = enricher(Some("{}"));
        assert!(on.is_enabled());
        let off = ConfidenceEnricher::new(false, Some(reviewer as Arc<dyn SecondaryReviewer>), retrier);
        assert!(!off.is_enabled());
    }

    #[test]
    fn prompt_summarizes_signal() {
        let p = build_review_prompt("ACME", &signal(0.8, -0.7), 0.76);
        assert!(p.contains("Subject: ACME"));
        assert!(p.contains("Sentiment: -0.70"));
        assert!(p.contains("Primary confidence: 0.76"));
        assert!(p.contains("https://news.example/1"));
    }
}
