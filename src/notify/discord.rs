use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    check_url, deliver_with_retry, post_json, truncate_chars, Channel, ChannelRuntime, SendError,
    ValidationOutcome,
};
use crate::config::WebhookConfig;
use crate::pipeline::types::{Alert, DeliveryOutcome};

const NAME: &str = "discord";

pub struct DiscordChannel {
    cfg: WebhookConfig,
    rt: ChannelRuntime,
}

impl DiscordChannel {
    pub fn new(cfg: WebhookConfig, rt: ChannelRuntime) -> Self {
        Self { cfg, rt }
    }

    /// `wait=true` makes Discord answer with the created message (and its id).
    fn endpoint(&self) -> String {
        let sep = if self.cfg.webhook_url.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}wait=true", self.cfg.webhook_url, sep)
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn from_alert(alert: &Alert) -> Self {
        let title = format!("{} · {}", alert.subject, alert.category);
        let color = if alert.sentiment > 0.0 {
            0x2ecc71
        } else if alert.sentiment < 0.0 {
            0xe74c3c
        } else {
            0x95a5a6
        };
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: truncate_chars(&title, 256),
                description: truncate_chars(&alert.formatted_message, 4000),
                color,
                timestamp: alert.created_at.to_rfc3339(),
            }],
        }
    }
}

#[derive(Deserialize)]
struct CreatedMessage {
    id: String,
}

async fn send_once(
    http: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<Option<String>, SendError> {
    let text = post_json(http, url, body).await?;
    Ok(serde_json::from_str::<CreatedMessage>(&text).ok().map(|m| m.id))
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    async fn validate(&self) -> ValidationOutcome {
        match check_url(&self.cfg.webhook_url) {
            Ok(()) => ValidationOutcome::ok(NAME),
            Err(e) => ValidationOutcome::invalid(NAME, format!("DISCORD_WEBHOOK_URL: {e}")),
        }
    }

    async fn send(&self, alert: &Alert) -> DeliveryOutcome {
        let url = self.endpoint();
        let body = match serde_json::to_value(DiscordWebhookPayload::from_alert(alert)) {
            Ok(v) => v,
            Err(e) => return DeliveryOutcome::failed(NAME, format!("encode payload: {e}"), 0, 0),
        };
        let (http, url, body) = (&self.rt.http, url.as_str(), &body);
        deliver_with_retry(NAME, &self.rt, move || send_once(http, url, body)).await
    }
}
