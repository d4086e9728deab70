use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use cadchat_session::{validate_session_id, Session};
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/v1/sessions/:session_id`: last persisted state
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    state
        .registry
        .snapshot(&session_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session {} not found", session_id)))
}

/// `POST /api/v1/sessions/:session_id/cancel`
pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_session_id(&session_id)?;
    let token = state
        .active_turns
        .get(&session_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ApiError::NotFound(format!("no turn is running for session {}", session_id)))?;

    info!(%session_id, "cancelling turn");
    token.cancel();
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "sessionId": session_id, "status": "cancelling" })),
    ))
}
