//! Alertmanager webhook receiver.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use herald_common::error::AppError;
use herald_engine::dispatcher::DispatchSummary;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/prometheus", post(receive_prometheus))
}

/// POST /webhooks/prometheus: render the alerts and queue them for every tracking room.
///
/// Any content type is accepted; a body that is not a webhook payload is a 400.
async fn receive_prometheus(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DispatchSummary>, AppError> {
    let summary = state.dispatcher.dispatch_json(&body)?;
    Ok(Json(summary))
}
