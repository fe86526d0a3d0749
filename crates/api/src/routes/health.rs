//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "herald-api",
        "version": env!("CARGO_PKG_VERSION"),
        "queue_depth": state.queue.len(),
        "worker": state.worker_stats.snapshot(),
        "backoff": {
            "initial_secs": state.config.backoff_initial_secs,
            "step_secs": state.config.backoff_step_secs,
            "max_secs": state.config.backoff_max_secs
        }
    }))
}
