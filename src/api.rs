// src/api.rs
//! HTTP surface. Only request validation produces 4xx; everything that goes
//! wrong downstream is reported inside a 200 body.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use shuttle_axum::axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use thiserror::Error;
use tower_http::cors::CorsLayer;

use crate::bootstrap::Pipeline;
use crate::error::PipelineError;
use crate::pipeline::Alert;

pub const MAX_SUBJECTS: usize = 100;
pub const MAX_ALERT_CHARS: usize = 4000;
pub const MANUAL_ALERT_HEADER: &str = "[MANUAL] Operator alert";

static SUBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,20}$").expect("subject regex"));

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/analyze", get(analyze_get).post(analyze_post))
        .route("/alert", post(manual_alert))
        .route("/channels", get(channels))
        .route("/admin/cache/reset", post(reset_cache))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------- errors ----------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("no subjects to analyze")]
    NoSubjects,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("analysis pipeline is disabled")]
    FeatureDisabled,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoSubjects => "NO_SUBJECTS",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::FeatureDisabled => "FEATURE_DISABLED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoSubjects | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::FeatureDisabled => StatusCode::FORBIDDEN,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Validation(msg) => ApiError::InvalidRequest(msg),
            other => ApiError::InvalidRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::info!(target: "api", code = self.code(), message = %self, "request rejected");
        let body = json!({
            "success": false,
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (self.status(), Json(body)).into_response()
    }
}

// ---------- /analyze ----------

#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    #[serde(default)]
    subjects: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeQuery {
    subjects: Option<String>,
}

async fn analyze_get(
    State(state): State<AppState>,
    query: Result<Query<AnalyzeQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    if !state.pipeline.config.enabled {
        return Err(ApiError::FeatureDisabled);
    }
    let Query(q) =
        query.map_err(|e| ApiError::InvalidRequest(format!("malformed query string: {e}")))?;
    let requested = q
        .subjects
        .map(|s| s.split(',').map(str::to_string).collect::<Vec<_>>());
    run_analysis(&state, requested).await
}

async fn analyze_post(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    if !state.pipeline.config.enabled {
        return Err(ApiError::FeatureDisabled);
    }
    let requested = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        let parsed: AnalyzeBody = serde_json::from_slice(&body)
            .map_err(|e| ApiError::InvalidRequest(format!("malformed JSON body: {e}")))?;
        parsed.subjects
    };
    run_analysis(&state, requested).await
}

async fn run_analysis(
    state: &AppState,
    requested: Option<Vec<String>>,
) -> Result<Json<Value>, ApiError> {
    let pipeline = &state.pipeline;
    if !pipeline.config.enabled {
        return Err(ApiError::FeatureDisabled);
    }
    let subjects = resolve_subjects(requested, &pipeline.config.default_subjects)?;
    tracing::info!(target: "api", count = subjects.len(), "analyze request");

    let report = pipeline.orchestrator.analyze_batch(subjects).await;

    let mut body = json!({
        "success": true,
        "results": report.results,
        "summary": report.summary,
        "totalDurationMs": report.total_duration_ms,
        "correlationId": report.correlation_id,
    });
    if report.summary.is_partial() {
        body["partial_success"] = Value::Bool(true);
    }
    Ok(Json(body))
}

/// Missing list → configured defaults; provided list → trimmed, blanks dropped,
/// duplicates collapsed (first occurrence wins).
pub fn resolve_subjects(
    requested: Option<Vec<String>>,
    defaults: &[String],
) -> Result<Vec<String>, ApiError> {
    let raw = requested.unwrap_or_else(|| defaults.to_vec());
    let mut seen = HashSet::new();
    let subjects: Vec<String> = raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect();

    if subjects.is_empty() {
        return Err(ApiError::NoSubjects);
    }
    if subjects.len() > MAX_SUBJECTS {
        return Err(ApiError::InvalidRequest(format!(
            "too many subjects: {} (max {MAX_SUBJECTS})",
            subjects.len()
        )));
    }
    if let Some(bad) = subjects.iter().find(|s| !SUBJECT_RE.is_match(s)) {
        return Err(ApiError::InvalidRequest(format!(
            "invalid subject '{bad}': expected 1-20 of [A-Za-z0-9_]"
        )));
    }
    Ok(subjects)
}

// ---------- /alert ----------

#[derive(Debug, Deserialize)]
struct AlertBody {
    text: String,
    /// Forward verbatim, without the manual-alert header.
    #[serde(default)]
    raw: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ManualAlertRequest {
    pub text: String,
    pub raw: bool,
}

/// JSON `{text, raw?}` when the body looks like an object, plain text otherwise.
pub fn parse_alert_body(body: &[u8]) -> Result<ManualAlertRequest, PipelineError> {
    let s = std::str::from_utf8(body)
        .map_err(|_| PipelineError::Validation("alert body is not valid UTF-8".into()))?;
    let trimmed = s.trim();
    let req = if trimmed.starts_with('{') {
        let b: AlertBody = serde_json::from_str(trimmed)
            .map_err(|e| PipelineError::Validation(format!("malformed JSON body: {e}")))?;
        ManualAlertRequest {
            text: b.text.trim().to_string(),
            raw: b.raw,
        }
    } else {
        ManualAlertRequest {
            text: trimmed.to_string(),
            raw: false,
        }
    };

    if req.text.is_empty() {
        return Err(PipelineError::Validation("alert text is empty".into()));
    }
    if req.text.chars().count() > MAX_ALERT_CHARS {
        return Err(PipelineError::Validation(format!(
            "alert text exceeds {MAX_ALERT_CHARS} characters"
        )));
    }
    Ok(req)
}

pub fn format_manual_alert(text: &str) -> String {
    format!("{MANUAL_ALERT_HEADER}\n{text}")
}

/// Manual alerts skip the secondary review, so `enriched` is always false.
async fn manual_alert(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let req = parse_alert_body(&body)?;
    let formatted = if req.raw {
        req.text.clone()
    } else {
        format_manual_alert(&req.text)
    };
    let alert = Alert::manual(&req.text, formatted, Utc::now());
    let outcomes = state.pipeline.dispatcher.dispatch(&alert).await;
    let enriched = alert.enrichment.is_some();
    tracing::info!(
        target: "api",
        channels = outcomes.len(),
        delivered = outcomes.iter().filter(|o| o.success).count(),
        "manual alert dispatched"
    );
    Ok(Json(json!({
        "success": true,
        "results": outcomes,
        "enriched": enriched,
    })))
}

// ---------- ops ----------

async fn channels(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "enabled": state.pipeline.dispatcher.enabled_channel_names() }))
}

async fn reset_cache(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.pipeline.cache.clear();
    tracing::info!(target: "api", cleared, "dedup cache reset");
    Json(json!({ "cleared": cleared }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Option<Vec<String>> {
        Some(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn missing_list_uses_defaults() {
        let defaults = vec!["AAPL".to_string(), "MSFT".to_string()];
        assert_eq!(resolve_subjects(None, &defaults).unwrap(), defaults);
        assert_eq!(resolve_subjects(None, &[]), Err(ApiError::NoSubjects));
    }

    #[test]
    fn provided_list_is_trimmed_and_deduped() {
        let out = resolve_subjects(v(&[" AAPL ", "", "MSFT", "AAPL"]), &[]).unwrap();
        assert_eq!(out, vec!["AAPL", "MSFT"]);
        assert_eq!(resolve_subjects(v(&["", "  "]), &[]), Err(ApiError::NoSubjects));
    }

    #[test]
    fn malformed_subjects_are_rejected() {
        let err = resolve_subjects(v(&["BRK.B"]), &[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        let long = "A".repeat(21);
        assert!(resolve_subjects(v(&[long.as_str()]), &[]).is_err());
        let many: Vec<String> = (0..101).map(|i| format!("T{i}")).collect();
        assert!(matches!(
            resolve_subjects(Some(many), &[]),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn alert_body_json_or_text() {
        let r = parse_alert_body(br#"{"text":"  halt trading  "}"#).unwrap();
        assert_eq!(r, ManualAlertRequest { text: "halt trading".into(), raw: false });
        let r = parse_alert_body(br#"{"text":"x","raw":true}"#).unwrap();
        assert!(r.raw);
        let r = parse_alert_body(b"plain words").unwrap();
        assert_eq!(r.text, "plain words");

        assert!(parse_alert_body(b"").is_err());
        assert!(parse_alert_body(br#"{"text":""}"#).is_err());
        assert!(parse_alert_body(br#"{"txt":"x"}"#).is_err());
        let huge = "x".repeat(MAX_ALERT_CHARS + 1);
        assert!(parse_alert_body(huge.as_bytes()).is_err());
    }

    #[test]
    fn error_codes_and_statuses() {
        assert_eq!(ApiError::NoSubjects.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::FeatureDisabled.status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::FeatureDisabled.code(), "FEATURE_DISABLED");
        let e: ApiError = PipelineError::Validation("bad".into()).into();
        assert_eq!(e, ApiError::InvalidRequest("bad".into()));
    }

    #[test]
    fn manual_format_prefixes_header() {
        assert_eq!(format_manual_alert("hi"), "[MANUAL] Operator alert\nhi");
    }
}
