//! Minimal OpenAI-compatible chat-completions client shared by the classifier
//! and the secondary reviewer.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::AiSettings;

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(settings: &AiSettings, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("ticker-alert-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .context("building chat http client")?;
        Ok(Self {
            http,
            api_key: settings.resolved_api_key().unwrap_or_default().to_string(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat round-trip; returns the first choice's content.
    pub async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("chat client has no API key");
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("chat request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            bail!("chat API returned {status}: {snippet}");
        }
        let body: Resp = resp.json().await.context("decoding chat response")?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("chat response had no content"))
    }
}

/// Pull the outermost `{...}` out of a model reply (models like to wrap JSON
/// in prose or code fences).
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
