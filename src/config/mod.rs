// src/config/mod.rs
//! Pipeline configuration: TOML file (optional) + environment overrides.
//!
//! Lookup order for the file:
//! 1) $PIPELINE_CONFIG_PATH
//! 2) config/pipeline.toml
//! 3) built-in defaults
//!
//! Env vars always win over the file. Optional stages (enrichment, every
//! delivery channel) default to OFF.

pub mod channels;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub use channels::{ChannelsConfig, EmailConfig, TelegramConfig, WebhookConfig};

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

pub const DEFAULT_SUBJECT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
pub const DEFAULT_CACHE_TTL_HOURS: f64 = 4.0;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master switch for `/analyze`.
    pub enabled: bool,
    pub enrichment_enabled: bool,
    pub subject_timeout_ms: u64,
    /// 0.0 .. 1.0
    pub confidence_threshold: f64,
    pub cache_ttl_hours: f64,
    pub cache_sweep_interval_secs: u64,
    pub max_retry_attempts: u32,
    pub base_backoff_ms: u64,
    /// Per-channel cap on one delivery, retries included.
    pub delivery_timeout_ms: u64,
    /// Used when a request carries no subject list.
    pub default_subjects: Vec<String>,
    /// Free-form market note handed to the classifier with every subject.
    pub market_context: Option<String>,
    /// Cache a no-alert marker when the secondary review pushes confidence
    /// under the threshold (same as the primary-gate branch).
    pub cache_enrichment_suppressed: bool,
    pub ai: AiSettings,
    pub channels: ChannelsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enrichment_enabled: false,
            subject_timeout_ms: DEFAULT_SUBJECT_TIMEOUT_MS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            cache_ttl_hours: DEFAULT_CACHE_TTL_HOURS,
            cache_sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
            default_subjects: Vec::new(),
            market_context: None,
            cache_enrichment_suppressed: true,
            ai: AiSettings::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

/// Classifier + secondary reviewer backend (OpenAI-compatible chat API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// `AI_TEST_MODE=mock` swaps the classifier for a deterministic mock.
    pub test_mode: bool,
    /// "ENV" means: read from OPENAI_API_KEY.
    pub api_key: String,
    pub base_url: String,
    pub classifier_model: String,
    pub reviewer_model: String,
    pub request_timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            test_mode: false,
            api_key: "ENV".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            classifier_model: "gpt-4o-mini".to_string(),
            reviewer_model: "gpt-4o".to_string(),
            request_timeout_secs: 20,
        }
    }
}

impl AiSettings {
    /// The usable key, if any. An unresolved "ENV" placeholder counts as missing.
    pub fn resolved_api_key(&self) -> Option<&str> {
        let k = self.api_key.trim();
        if k.is_empty() || k.eq_ignore_ascii_case("env") {
            None
        } else {
            Some(k)
        }
    }
}

impl PipelineConfig {
    /// File (if any) + process env.
    pub fn load() -> Result<Self> {
        let mut cfg = match config_path()? {
            Some(p) => Self::load_from_file(&p)?,
            None => Self::default(),
        };
        cfg.apply_overrides(|k| std::env::var(k).ok());
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let cfg: PipelineConfig = toml::from_str(&data)
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        Ok(cfg)
    }

    /// Apply overrides from any key/value source (process env in production,
    /// a map in tests). Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| {
            lookup(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        set_flag(&get, "PIPELINE_ENABLED", &mut self.enabled);
        set_flag(&get, "ENRICHMENT_ENABLED", &mut self.enrichment_enabled);
        set_flag(
            &get,
            "CACHE_ENRICHMENT_SUPPRESSED",
            &mut self.cache_enrichment_suppressed,
        );
        set_parsed(&get, "SUBJECT_TIMEOUT_MS", &mut self.subject_timeout_ms);
        set_parsed(&get, "CONFIDENCE_THRESHOLD", &mut self.confidence_threshold);
        set_parsed(&get, "CACHE_TTL_HOURS", &mut self.cache_ttl_hours);
        set_parsed(
            &get,
            "CACHE_SWEEP_INTERVAL_SECS",
            &mut self.cache_sweep_interval_secs,
        );
        set_parsed(&get, "MAX_RETRY_ATTEMPTS", &mut self.max_retry_attempts);
        set_parsed(&get, "BASE_BACKOFF_MS", &mut self.base_backoff_ms);
        set_parsed(&get, "DELIVERY_TIMEOUT_MS", &mut self.delivery_timeout_ms);

        if let Some(list) = get("DEFAULT_SUBJECTS") {
            self.default_subjects = split_list(&list);
        }
        if let Some(ctx) = get("MARKET_CONTEXT") {
            self.market_context = Some(ctx);
        }

        if let Some(mode) = get("AI_TEST_MODE") {
            self.ai.test_mode = mode.eq_ignore_ascii_case("mock");
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.ai.base_url = url;
        }
        if let Some(m) = get("CLASSIFIER_MODEL") {
            self.ai.classifier_model = m;
        }
        if let Some(m) = get("REVIEWER_MODEL") {
            self.ai.reviewer_model = m;
        }
        // Resolve api key if "ENV"
        if self.ai.api_key.trim().eq_ignore_ascii_case("env") {
            self.ai.api_key = get("OPENAI_API_KEY").unwrap_or_default();
        }

        self.channels.apply_overrides(&get);
    }

    /// Pull out-of-range values back to something usable.
    pub fn sanitize(&mut self) {
        if !self.confidence_threshold.is_finite() {
            self.confidence_threshold = DEFAULT_CONFIDENCE_THRESHOLD;
        }
        self.confidence_threshold = self.confidence_threshold.clamp(0.0, 1.0);
        if self.subject_timeout_ms == 0 {
            self.subject_timeout_ms = DEFAULT_SUBJECT_TIMEOUT_MS;
        }
        if !self.cache_ttl_hours.is_finite() || self.cache_ttl_hours < 0.0 {
            self.cache_ttl_hours = DEFAULT_CACHE_TTL_HOURS;
        }
        if self.delivery_timeout_ms == 0 {
            self.delivery_timeout_ms = DEFAULT_DELIVERY_TIMEOUT_MS;
        }
        if self.max_retry_attempts == 0 {
            self.max_retry_attempts = 1;
        }
        self.default_subjects = self
            .default_subjects
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    pub fn subject_timeout(&self) -> Duration {
        Duration::from_millis(self.subject_timeout_ms)
    }

    /// Saturates at `Duration::MAX` for absurdly large TTLs.
    pub fn cache_ttl(&self) -> Duration {
        Duration::try_from_secs_f64(self.cache_ttl_hours.max(0.0) * 3600.0).unwrap_or(Duration::MAX)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs.max(1))
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

fn config_path() -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    Ok(default.exists().then_some(default))
}

/// "1" | "true" | "yes" | "on" (case-insensitive) → true; "0" | "false" | "no" | "off" → false.
pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn set_flag<G>(get: &G, key: &str, slot: &mut bool)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match parse_flag(&raw) {
            Some(v) => *slot = v,
            None => tracing::warn!(target: "config", key, value = %raw, "ignoring invalid flag"),
        }
    }
}

pub(crate) fn set_parsed<G, T>(get: &G, key: &str, slot: &mut T)
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = get(key) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(target: "config", key, value = %raw, "ignoring invalid number"),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
