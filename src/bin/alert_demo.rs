//! Sends one manual alert through every configured channel and prints the outcomes.
//!
//! Usage: `cargo run --bin alert_demo -- "text of the alert"`

use chrono::Utc;
use ticker_alert_pipeline::api::format_manual_alert;
use ticker_alert_pipeline::pipeline::Alert;
use ticker_alert_pipeline::{telemetry, Pipeline, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let text = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let text = if text.trim().is_empty() {
        "alert_demo: delivery check".to_string()
    } else {
        text
    };

    let mut config = PipelineConfig::load()?;
    // no classifier calls here; keep the demo offline-safe
    config.ai.test_mode = true;
    let pipeline = Pipeline::from_config(config)?;
    for v in pipeline.start().await {
        println!(
            "{:<9} {}",
            v.channel,
            if v.valid {
                "ready".to_string()
            } else {
                format!("skipped ({})", v.reason.unwrap_or_default())
            }
        );
    }

    let alert = Alert::manual(&text, format_manual_alert(&text), Utc::now());
    let outcomes = pipeline.dispatcher.dispatch(&alert).await;
    if outcomes.is_empty() {
        println!("no enabled channels; nothing sent");
    }
    for o in &outcomes {
        println!(
            "{:<9} success={} attempts={} {}ms {}",
            o.channel_name,
            o.success,
            o.attempt_count,
            o.duration_ms,
            o.error.as_deref().or(o.message_id.as_deref()).unwrap_or("")
        );
    }

    pipeline.shutdown();
    println!("alert-demo done");
    Ok(())
}
