use async_trait::async_trait;

use super::{
    check_url, deliver_with_retry, post_json, truncate_chars, Channel, ChannelRuntime,
    ValidationOutcome,
};
use crate::config::WebhookConfig;
use crate::pipeline::types::{Alert, DeliveryOutcome};

const NAME: &str = "slack";

/// Slack incoming webhook. Slack answers a bare `ok`, so there is no message id.
pub struct SlackChannel {
    cfg: WebhookConfig,
    rt: ChannelRuntime,
}

impl SlackChannel {
    pub fn new(cfg: WebhookConfig, rt: ChannelRuntime) -> Self {
        Self { cfg, rt }
    }
}

fn slack_text(alert: &Alert) -> String {
    let msg = truncate_chars(&alert.formatted_message, 3500);
    let mut lines = msg.lines();
    let head = lines.next().unwrap_or_default();
    let rest: Vec<&str> = lines.collect();
    if rest.is_empty() {
        format!("*{head}*")
    } else {
        format!("*{head}*\n{}", rest.join("\n"))
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    async fn validate(&self) -> ValidationOutcome {
        match check_url(&self.cfg.webhook_url) {
            Ok(()) => ValidationOutcome::ok(NAME),
            Err(e) => ValidationOutcome::invalid(NAME, format!("SLACK_WEBHOOK_URL: {e}")),
        }
    }

    async fn send(&self, alert: &Alert) -> DeliveryOutcome {
        let body = serde_json::json!({ "text": slack_text(alert) });
        let (http, url, body) = (&self.rt.http, self.cfg.webhook_url.as_str(), &body);
        deliver_with_retry(NAME, &self.rt, move || async move {
            post_json(http, url, body).await.map(|_| None::<String>)
        })
        .await
    }
}
