// src/notify/telegram.rs
//! Telegram Bot API (`sendMessage`, HTML parse mode).

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    check_url, deliver_with_retry, post_json, truncate_chars, Channel, ChannelRuntime, SendError,
    ValidationOutcome,
};
use crate::config::TelegramConfig;
use crate::pipeline::types::{Alert, DeliveryOutcome};

const NAME: &str = "telegram";
/// Telegram rejects messages above 4096 chars; leave room for markup.
const MAX_TEXT_CHARS: usize = 3800;

pub struct TelegramChannel {
    cfg: TelegramConfig,
    rt: ChannelRuntime,
}

impl TelegramChannel {
    pub fn new(cfg: TelegramConfig, rt: ChannelRuntime) -> Self {
        Self { cfg, rt }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.cfg.api_base.trim_end_matches('/'),
            self.cfg.bot_token
        )
    }
}

/// Escape for HTML parse mode and bold the first line.
pub(crate) fn render_html(alert: &Alert) -> String {
    let text = truncate_chars(&alert.formatted_message, MAX_TEXT_CHARS);
    let mut lines = text.lines();
    let head = lines.next().unwrap_or_default();
    let mut out = format!("<b>{}</b>", html_escape::encode_text(head));
    for line in lines {
        out.push('\n');
        out.push_str(&html_escape::encode_text(line));
    }
    out
}

#[derive(Deserialize)]
struct TgResponse {
    ok: bool,
    #[serde(default)]
    result: Option<TgMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct TgMessage {
    message_id: i64,
}

fn parse_message_id(body: &str) -> Result<Option<String>, SendError> {
    let parsed: TgResponse = match serde_json::from_str(body) {
        Ok(v) => v,
        // 2xx with an unexpected body still counts as delivered
        Err(_) => return Ok(None),
    };
    if !parsed.ok {
        return Err(SendError::permanent(format!(
            "telegram rejected message: {}",
            parsed.description.unwrap_or_default()
        )));
    }
    Ok(parsed.result.map(|m| m.message_id.to_string()))
}

async fn send_once(
    http: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<Option<String>, SendError> {
    let text = post_json(http, url, body).await?;
    parse_message_id(&text)
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        NAME
    }

    fn is_enabled(&self) -> bool {
        self.cfg.enabled
    }

    async fn validate(&self) -> ValidationOutcome {
        if self.cfg.bot_token.trim().is_empty() {
            return ValidationOutcome::invalid(NAME, "TELEGRAM_BOT_TOKEN missing");
        }
        if !self.cfg.bot_token.contains(':') {
            return ValidationOutcome::invalid(NAME, "TELEGRAM_BOT_TOKEN malformed");
        }
        if self.cfg.chat_id.trim().is_empty() {
            return ValidationOutcome::invalid(NAME, "TELEGRAM_CHAT_ID missing");
        }
        if let Err(e) = check_url(&self.cfg.api_base) {
            return ValidationOutcome::invalid(NAME, format!("api_base: {e}"));
        }
        ValidationOutcome::ok(NAME)
    }

    async fn send(&self, alert: &Alert) -> DeliveryOutcome {
        let url = self.endpoint();
        let body = serde_json::json!({
            "chat_id": self.cfg.chat_id,
            "text": render_html(alert),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        let (http, url, body) = (&self.rt.http, url.as_str(), &body);
        deliver_with_retry(NAME, &self.rt, move || send_once(http, url, body)).await
    }
}
