// src/notify/mod.rs
//! Delivery channels. Each concrete transport implements [`Channel`]; the
//! dispatcher only ever sees `Arc<dyn Channel>`.

pub mod discord;
pub mod email;
pub mod slack;
pub mod telegram;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::config::ChannelsConfig;
use crate::pipeline::retry::{AttemptError, BackoffRetrier};
use crate::pipeline::types::{Alert, DeliveryOutcome};

pub use discord::DiscordChannel;
pub use email::EmailChannel;
pub use slack::SlackChannel;
pub use telegram::TelegramChannel;

/// Startup check result for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationOutcome {
    pub channel: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationOutcome {
    pub fn ok(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(channel: &str, reason: impl Into<String>) -> Self {
        Self {
            channel: channel.to_string(),
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// A delivery integration.
///
/// `send` never fails: transport errors (after the channel's own retries)
/// come back as `DeliveryOutcome { success: false, .. }`.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;
    /// Feature flag for this channel.
    fn is_enabled(&self) -> bool;
    /// Local credential/shape check, run once at startup.
    async fn validate(&self) -> ValidationOutcome;
    async fn send(&self, alert: &Alert) -> DeliveryOutcome;
}

/// What every concrete channel needs to talk to the outside world.
#[derive(Clone)]
pub struct ChannelRuntime {
    pub http: reqwest::Client,
    pub retrier: Arc<BackoffRetrier>,
    pub max_attempts: u32,
}

impl ChannelRuntime {
    pub fn new(
        cfg: &ChannelsConfig,
        retrier: Arc<BackoffRetrier>,
        max_attempts: u32,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ticker-alert-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(std::time::Duration::from_secs(4))
            .timeout(cfg.http_timeout())
            .build()
            .context("building channel http client")?;
        Ok(Self {
            http,
            retrier,
            max_attempts,
        })
    }
}

/// Build every known channel from config. Disabled ones are still returned so
/// that `/channels` and startup validation can report on them.
pub fn build_channels(cfg: &ChannelsConfig, rt: &ChannelRuntime) -> Vec<Arc<dyn Channel>> {
    vec![
        Arc::new(TelegramChannel::new(cfg.telegram.clone(), rt.clone())),
        Arc::new(DiscordChannel::new(cfg.discord.clone(), rt.clone())),
        Arc::new(SlackChannel::new(cfg.slack.clone(), rt.clone())),
        Arc::new(EmailChannel::new(cfg.email.clone(), rt.clone())),
    ]
}

/// One failed send attempt.
#[derive(Debug, Clone)]
pub(crate) struct SendError {
    pub message: String,
    pub retryable: bool,
}

impl SendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Run `op` through the retrier and fold the result into a `DeliveryOutcome`.
/// Non-retryable failures (e.g. 4xx) stop immediately.
pub(crate) async fn deliver_with_retry<F, Fut>(
    channel: &str,
    rt: &ChannelRuntime,
    op: F,
) -> DeliveryOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<String>, SendError>>,
{
    let out = rt
        .retrier
        .execute_with_policy(op, rt.max_attempts, |e: &SendError| e.retryable)
        .await;
    match out.result {
        Ok(message_id) => DeliveryOutcome {
            channel_name: channel.to_string(),
            success: true,
            message_id,
            error: None,
            attempt_count: out.attempt_count,
            duration_ms: out.total_duration_ms,
        },
        Err(e) => {
            let msg = match e {
                AttemptError::Failed(se) => se.message,
                other => other.to_string(),
            };
            DeliveryOutcome::failed(channel, msg, out.attempt_count, out.total_duration_ms)
        }
    }
}

/// POST a JSON body and return the response text on 2xx.
/// 429 / 5xx / transport errors are retryable, other 4xx are not.
pub(crate) async fn post_json(
    http: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> std::result::Result<String, SendError> {
    let resp = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            SendError::retryable(format!("request failed: {}", redact(&e.to_string())))
        })?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if status.is_success() {
        return Ok(text);
    }
    let snippet: String = text.chars().take(200).collect();
    let msg = format!("HTTP {status}: {snippet}");
    if status.as_u16() == 429 || status.is_server_error() {
        Err(SendError::retryable(msg))
    } else {
        Err(SendError::permanent(msg))
    }
}

/// Require an absolute http(s) URL.
pub(crate) fn check_url(raw: &str) -> std::result::Result<(), String> {
    if raw.trim().is_empty() {
        return Err("missing URL".to_string());
    }
    let url = reqwest::Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported URL scheme '{other}'")),
    }
}

/// Cut to at most `max` chars, marking the cut with an ellipsis.
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// reqwest errors include the URL, which for webhooks/bots embeds the secret.
fn redact(msg: &str) -> String {
    static RE: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(
            r"(bot[0-9]+:[A-Za-z0-9_-]+|webhooks/[0-9]+/[A-Za-z0-9_-]+|services/[A-Za-z0-9/]+)",
        )
        .expect("redaction regex")
    });
    re.replace_all(msg, "<redacted>").to_string()
}
