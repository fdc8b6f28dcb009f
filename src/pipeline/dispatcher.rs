// src/pipeline/dispatcher.rs
//! Concurrent fan-out of one alert to every enabled channel.
//!
//! Each channel runs its own retries inside `send`. A failing, panicking or
//! hung channel only produces a failed `DeliveryOutcome`; it never cancels siblings.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use metrics::counter;

use super::anomaly::{report_quietly, Anomaly, AnomalyKind, AnomalyReporter};
use super::types::{Alert, DeliveryOutcome};
use crate::error::PipelineError;
use crate::notify::{Channel, ValidationOutcome};

pub struct ChannelDispatcher {
    channels: Vec<Arc<dyn Channel>>,
    /// Channels that failed startup validation.
    excluded: RwLock<HashSet<String>>,
    reporter: Arc<dyn AnomalyReporter>,
    /// Upper bound for one channel's `send`, retries included.
    send_timeout: Option<Duration>,
}

impl ChannelDispatcher {
    pub fn new(channels: Vec<Arc<dyn Channel>>, reporter: Arc<dyn AnomalyReporter>) -> Self {
        Self {
            channels,
            excluded: RwLock::new(HashSet::new()),
            reporter,
            send_timeout: None,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Validate every enabled channel once. Invalid ones are excluded from
    /// future sends; nothing here is fatal.
    pub async fn validate_all(&self) -> Vec<ValidationOutcome> {
        let checks = self.channels.iter().map(|ch| async move {
            if !ch.is_enabled() {
                return ValidationOutcome::invalid(ch.name(), "disabled");
            }
            let name = ch.name().to_string();
            match AssertUnwindSafe(ch.validate()).catch_unwind().await {
                Ok(v) => v,
                Err(_) => ValidationOutcome::invalid(&name, "validation panicked"),
            }
        });
        let outcomes = join_all(checks).await;

        let mut excluded = match self.excluded.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        for (ch, v) in self.channels.iter().zip(&outcomes) {
            if !ch.is_enabled() {
                continue;
            }
            if v.valid {
                excluded.remove(ch.name());
                tracing::info!(target: "dispatch", channel = ch.name(), "channel ready");
            } else if excluded.insert(ch.name().to_string()) {
                let err = PipelineError::Configuration {
                    channel: ch.name().to_string(),
                    message: v.reason.clone().unwrap_or_else(|| "invalid".to_string()),
                };
                tracing::warn!(target: "dispatch", error = %err, "excluded from delivery");
            }
        }
        outcomes
    }

    /// Enabled channels that passed validation (or were never validated).
    pub fn enabled_channels(&self) -> Vec<Arc<dyn Channel>> {
        let excluded = match self.excluded.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        self.channels
            .iter()
            .filter(|ch| ch.is_enabled() && !excluded.contains(ch.name()))
            .cloned()
            .collect()
    }

    pub fn enabled_channel_names(&self) -> Vec<String> {
        self.enabled_channels()
            .iter()
            .map(|ch| ch.name().to_string())
            .collect()
    }

    pub async fn dispatch(&self, alert: &Alert) -> Vec<DeliveryOutcome> {
        self.dispatch_correlated(alert, None).await
    }

    /// Same as [`dispatch`](Self::dispatch); anomalies carry `correlation_id`.
    pub async fn dispatch_correlated(
        &self,
        alert: &Alert,
        correlation_id: Option<&str>,
    ) -> Vec<DeliveryOutcome> {
        let channels = self.enabled_channels();
        if channels.is_empty() {
            tracing::warn!(
                target: "dispatch",
                subject = %alert.subject,
                "no enabled delivery channels; alert not sent"
            );
            return Vec::new();
        }

        let sends = channels
            .iter()
            .map(|ch| send_isolated(ch.as_ref(), alert, self.send_timeout));
        let outcomes = join_all(sends).await;

        for o in &outcomes {
            let result = if o.success { "ok" } else { "failed" };
            counter!(
                "delivery_outcomes_total",
                "channel" => o.channel_name.clone(),
                "result" => result
            )
            .increment(1);

            if o.success {
                tracing::info!(
                    target: "dispatch",
                    channel = %o.channel_name,
                    subject = %alert.subject,
                    attempts = o.attempt_count,
                    "delivered"
                );
            } else {
                report_quietly(
                    self.reporter.as_ref(),
                    Anomaly {
                        kind: AnomalyKind::DeliveryFailure,
                        subject: Some(alert.subject.clone()),
                        channel: Some(o.channel_name.clone()),
                        message: o.error.clone().unwrap_or_default(),
                        correlation_id: correlation_id.map(str::to_string),
                    },
                );
            }
        }
        outcomes
    }
}

async fn send_isolated(ch: &dyn Channel, alert: &Alert, limit: Option<Duration>) -> DeliveryOutcome {
    let started = Instant::now();
    let guarded = AssertUnwindSafe(ch.send(alert)).catch_unwind();
    let res = match limit {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(res) => res,
            Err(_) => {
                return DeliveryOutcome::failed(
                    ch.name(),
                    format!("delivery timed out after {}ms", limit.as_millis()),
                    1,
                    started.elapsed().as_millis() as u64,
                )
            }
        },
        None => guarded.await,
    };
    match res {
        Ok(outcome) => outcome,
        Err(_) => DeliveryOutcome::failed(
            ch.name(),
            "channel panicked during send",
            1,
            started.elapsed().as_millis() as u64,
        ),
    }
}
