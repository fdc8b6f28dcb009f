// src/lib.rs
// Public library surface for the binary, the demo bin and integration tests.

pub mod analyze;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::bootstrap::Pipeline;
pub use crate::config::PipelineConfig;
pub use crate::error::PipelineError;
