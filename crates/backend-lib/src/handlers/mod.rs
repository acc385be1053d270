//! HTTP handlers.
pub mod shapes;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Realtime Drawing Server is running.",
        "rooms": state.registry.room_count(),
    }))
}
