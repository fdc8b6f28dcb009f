// src/config/channels.rs
//! Per-channel credentials. A channel with incomplete credentials is excluded
//! at validation time; it never stops the service from starting.

use serde::{Deserialize, Serialize};

use super::{set_flag, set_parsed};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telegram: TelegramConfig,
    pub discord: WebhookConfig,
    pub slack: WebhookConfig,
    pub email: EmailConfig,
    /// Per-request HTTP timeout for webhook-style channels.
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub webhook_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub from: String,
    pub to: String,
}

impl ChannelsConfig {
    pub(crate) fn apply_overrides<G>(&mut self, get: &G)
    where
        G: Fn(&str) -> Option<String>,
    {
        set_parsed(get, "CHANNEL_HTTP_TIMEOUT_SECS", &mut self.http_timeout_secs);

        set_flag(get, "TELEGRAM_ENABLED", &mut self.telegram.enabled);
        override_string(get, "TELEGRAM_BOT_TOKEN", &mut self.telegram.bot_token);
        override_string(get, "TELEGRAM_CHAT_ID", &mut self.telegram.chat_id);
        override_string(get, "TELEGRAM_API_BASE", &mut self.telegram.api_base);

        set_flag(get, "DISCORD_ENABLED", &mut self.discord.enabled);
        override_string(get, "DISCORD_WEBHOOK_URL", &mut self.discord.webhook_url);

        set_flag(get, "SLACK_ENABLED", &mut self.slack.enabled);
        override_string(get, "SLACK_WEBHOOK_URL", &mut self.slack.webhook_url);

        set_flag(get, "EMAIL_ENABLED", &mut self.email.enabled);
        override_string(get, "SMTP_HOST", &mut self.email.smtp_host);
        override_string(get, "SMTP_USER", &mut self.email.smtp_user);
        override_string(get, "SMTP_PASS", &mut self.email.smtp_pass);
        override_string(get, "NOTIFY_EMAIL_FROM", &mut self.email.from);
        override_string(get, "NOTIFY_EMAIL_TO", &mut self.email.to);
    }

    pub fn http_timeout(&self) -> std::time::Duration {
        let secs = if self.http_timeout_secs == 0 {
            10
        } else {
            self.http_timeout_secs
        };
        std::time::Duration::from_secs(secs)
    }
}

fn override_string<G>(get: &G, key: &str, slot: &mut String)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(v) = get(key) {
        *slot = v;
    }
}
