//! REST endpoints for bridged sessions.
//!
//! - `GET    /api/sessions`      — list live sessions
//! - `DELETE /api/sessions/{id}` — stop a session

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/sessions` — list all live sessions, oldest first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.sessions.list();
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

/// `DELETE /api/sessions/{id}` — stop a session.
///
/// The bridge drains buffered output and closes the client before the
/// session disappears from the listing.
pub async fn kill_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if state.sessions.kill(&id) {
        Ok(Json(json!({"session_id": id, "status": "stopping"})))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Session not found", "session_id": id})),
        ))
    }
}
