//! Room command and tracking routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use herald_common::error::AppError;
use herald_common::types::RoomId;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/rooms/{room_id}/commands", post(run_command))
        .route("/api/rooms/{room_id}/tracking", get(get_tracking))
        .route("/api/projects", get(list_projects))
}

/// A chat message addressed to the bot.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub sender: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct CommandReply {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct TrackingResponse {
    pub room_id: RoomId,
    pub projects: Vec<String>,
}

/// POST /api/rooms/:room_id/commands: Run a bot command in a room.
async fn run_command(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandReply>, AppError> {
    if request.sender.trim().is_empty() {
        return Err(AppError::Validation("sender must not be empty".to_string()));
    }

    // Tracking changes rewrite the store file; keep that off the async workers.
    let room = RoomId::new(room_id);
    let commands = state.commands.clone();
    let reply = tokio::task::spawn_blocking(move || {
        commands.handle(&room, &request.sender, &request.body)
    })
    .await
    .map_err(|e| AppError::Internal(format!("Command task failed: {e}")))??;
    Ok(Json(CommandReply { reply }))
}

/// GET /api/rooms/:room_id/tracking: Projects the room receives alerts for.
async fn get_tracking(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Json<TrackingResponse> {
    let room_id = RoomId::new(room_id);
    let projects = state.tracker.tracking(&room_id);
    Json(TrackingResponse { room_id, projects })
}

/// GET /api/projects: Projects rooms may track.
async fn list_projects(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.store.known_projects())
}
