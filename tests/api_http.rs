// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /analyze, GET /analyze (happy path, validation errors, feature flag)
// - POST /alert (JSON + raw text, validation)
// - GET /channels, POST /admin/cache/reset

mod common;

use std::sync::Arc;

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use common::*;
use ticker_alert_pipeline::notify::Channel;
use ticker_alert_pipeline::{api, AppState, PipelineConfig};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn app_with(cfg: PipelineConfig, classifier: ScriptedClassifier, channels: Vec<Arc<dyn Channel>>) -> Router {
    let pipeline = build_pipeline(
        cfg,
        Arc::new(classifier),
        None,
        channels,
        Arc::new(RecordingReporter::default()),
    );
    api::router(AppState::new(pipeline))
}

fn test_router() -> Router {
    app_with(fast_config(), ScriptedClassifier::new(), Vec::new())
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Json) {
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

fn post_json(uri: &str, payload: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = test_router().oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn analyze_returns_results_and_summary() {
    let app = app_with(
        fast_config(),
        ScriptedClassifier::new().with("BAD", Script::Fail),
        Vec::new(),
    );
    let (status, v) = send(app, post_json("/analyze", json!({ "subjects": ["AAPL", "BAD", "MSFT"] }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["success"], json!(true));
    assert_eq!(v["partial_success"], json!(true));
    assert!(v["correlationId"].is_string());
    assert!(v["totalDurationMs"].is_u64());

    let results = v["results"].as_array().expect("results array");
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["subject"], "AAPL");
    assert_eq!(results[0]["status"], "ANALYZED");
    assert_eq!(results[1]["status"], "ERROR");
    assert!(results[0]["alert"]["formattedMessage"].is_string());

    assert_eq!(v["summary"]["total"], 3);
    assert_eq!(v["summary"]["errored"], 1);
    assert_eq!(v["summary"]["alertsSent"], 2);
}

#[tokio::test]
async fn analyze_get_accepts_comma_list() {
    let req = Request::builder()
        .method("GET")
        .uri("/analyze?subjects=AAPL,MSFT")
        .body(Body::empty())
        .unwrap();
    let (status, v) = send(test_router(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["results"].as_array().unwrap().len(), 2);
    assert!(v.get("partial_success").is_none());
}

#[tokio::test]
async fn analyze_without_subjects_or_defaults_is_400() {
    let (status, v) = send(test_router(), post_json("/analyze", json!({ "subjects": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["success"], json!(false));
    assert_eq!(v["error"]["code"], "NO_SUBJECTS");

    let req = Request::builder()
        .method("POST")
        .uri("/analyze")
        .body(Body::empty())
        .unwrap();
    let (status, v) = send(test_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"]["code"], "NO_SUBJECTS");
}

#[tokio::test]
async fn analyze_missing_list_uses_defaults() {
    let mut cfg = fast_config();
    cfg.default_subjects = vec!["DIA".into()];
    let app = app_with(cfg, ScriptedClassifier::new(), Vec::new());
    let (status, v) = send(app, post_json("/analyze", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["results"][0]["subject"], "DIA");
}

#[tokio::test]
async fn analyze_rejects_malformed_input() {
    let (status, v) = send(test_router(), post_json("/analyze", json!({ "subjects": ["BRK.B"] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"]["code"], "INVALID_REQUEST");

    let req = Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, v) = send(test_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"]["code"], "INVALID_REQUEST");

    let many: Vec<String> = (0..101).map(|i| format!("T{i}")).collect();
    let (status, _) = send(test_router(), post_json("/analyze", json!({ "subjects": many }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn analyze_disabled_is_403() {
    let mut cfg = fast_config();
    cfg.enabled = false;
    let app = app_with(cfg, ScriptedClassifier::new(), Vec::new());
    let (status, v) = send(app, post_json("/analyze", json!({ "subjects": ["AAPL"] }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(v["error"]["code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn analyze_get_repeated_key_is_a_json_400() {
    let req = Request::builder()
        .method("GET")
        .uri("/analyze?subjects=AAPL&subjects=MSFT")
        .body(Body::empty())
        .unwrap();
    let (status, v) = send(test_router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["success"], json!(false));
    assert_eq!(v["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn analyze_get_checks_feature_flag_before_query() {
    let mut cfg = fast_config();
    cfg.enabled = false;
    let app = app_with(cfg, ScriptedClassifier::new(), Vec::new());
    let req = Request::builder()
        .method("GET")
        .uri("/analyze?subjects=AAPL&subjects=MSFT")
        .body(Body::empty())
        .unwrap();
    let (status, v) = send(app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(v["error"]["code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn manual_alert_fans_out_to_channels() {
    let ok = FakeChannel::ok("ops");
    let bad = FakeChannel::failing("pager");
    let app = app_with(
        fast_config(),
        ScriptedClassifier::new(),
        vec![ok.clone() as Arc<dyn Channel>, bad.clone() as Arc<dyn Channel>],
    );

    let (status, v) = send(app, post_json("/alert", json!({ "text": "Trading halted" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["success"], json!(true));
    // header wrapping is formatting, not a secondary review
    assert_eq!(v["enriched"], json!(false));
    let results = v["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["success"], json!(true));
    assert_eq!(results[1]["success"], json!(false));

    let sent = ok.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "MANUAL");
    assert!(sent[0].formatted_message.starts_with("[MANUAL]"));
    assert!(sent[0].formatted_message.ends_with("Trading halted"));
}

#[tokio::test]
async fn manual_alert_accepts_raw_text() {
    let ok = FakeChannel::ok("ops");
    let app = app_with(fast_config(), ScriptedClassifier::new(), vec![ok.clone() as Arc<dyn Channel>]);
    let req = Request::builder()
        .method("POST")
        .uri("/alert")
        .header("content-type", "text/plain")
        .body(Body::from("plain operator note"))
        .unwrap();
    let (status, v) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["results"].as_array().unwrap().len(), 1);
    assert_eq!(ok.sent.lock().unwrap()[0].headline, "plain operator note");
}

#[tokio::test]
async fn manual_alert_verbatim_is_not_enriched() {
    let ok = FakeChannel::ok("ops");
    let app = app_with(fast_config(), ScriptedClassifier::new(), vec![ok.clone() as Arc<dyn Channel>]);
    let (status, v) = send(app, post_json("/alert", json!({ "text": "as-is", "raw": true }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["enriched"], json!(false));
    assert_eq!(ok.sent.lock().unwrap()[0].formatted_message, "as-is");
}

#[tokio::test]
async fn manual_alert_rejects_empty_text() {
    let (status, v) = send(test_router(), post_json("/alert", json!({ "text": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn channels_and_cache_reset() {
    let app = app_with(
        fast_config(),
        ScriptedClassifier::new(),
        vec![FakeChannel::ok("ops") as Arc<dyn Channel>],
    );

    let req = Request::builder().uri("/channels").body(Body::empty()).unwrap();
    let (status, v) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["enabled"], json!(["ops"]));

    let (_, _) = send(app.clone(), post_json("/analyze", json!({ "subjects": ["AAPL"] }))).await;
    let (_, v) = send(app.clone(), post_json("/analyze", json!({ "subjects": ["AAPL"] }))).await;
    assert_eq!(v["results"][0]["status"], "CACHED");
    assert_eq!(v["summary"]["cached"], 1);

    let req = Request::builder()
        .method("POST")
        .uri("/admin/cache/reset")
        .body(Body::empty())
        .unwrap();
    let (status, v) = send(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["cleared"], 1);

    let (_, v) = send(app, post_json("/analyze", json!({ "subjects": ["AAPL"] }))).await;
    assert_eq!(v["results"][0]["status"], "ANALYZED");
}
