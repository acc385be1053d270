// ============================
// crates/backend-lib/src/handlers/shapes.rs
// ============================
//! REST access to a room's persisted shapes.
//!
//! These go straight to the persistence gateway; they do not touch a live
//! room's in-memory canvas.
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde_json::{json, Value};
use whiteboard_common::Shape;

use crate::error::AppError;
use crate::AppState;

fn require_room_id(room_id: &str) -> Result<(), AppError> {
    if room_id.trim().is_empty() {
        return Err(AppError::InvalidInput("Room ID is required".to_string()));
    }
    Ok(())
}

/// Reject the whole batch at the first invalid element
fn validate_batch(shapes: &[Value]) -> Result<(), AppError> {
    for (index, value) in shapes.iter().enumerate() {
        if let Err(e) = Shape::from_value(value) {
            tracing::warn!(index, error = %e, "rejected shape batch");
            return Err(AppError::InvalidShape {
                index,
                reason: e.to_string(),
            });
        }
    }
    Ok(())
}

/// `GET /shapes/{room_id}`
pub async fn get_shapes(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Shape>>, AppError> {
    require_room_id(&room_id)?;
    let shapes = state.gateway.load_shapes(&room_id).await.map_err(|e| {
        tracing::error!(room = %room_id, error = %e, "error fetching shapes");
        e
    })?;
    tracing::info!(room = %room_id, count = shapes.len(), "fetched shapes");
    Ok(Json(shapes))
}

/// `POST /shapes/{room_id}` with a JSON array body; replaces every shape
pub async fn update_shapes(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    require_room_id(&room_id)?;
    let Json(body) = body.map_err(|e| AppError::InvalidInput(e.body_text()))?;
    let Value::Array(shapes) = body else {
        return Err(AppError::InvalidInput("Shapes must be an array".to_string()));
    };
    validate_batch(&shapes)?;

    let stored = state
        .gateway
        .replace_shapes(&room_id, &shapes)
        .await
        .map_err(|e| {
            tracing::error!(room = %room_id, error = %e, "error updating shapes");
            e
        })?;
    tracing::info!(room = %room_id, count = stored, "updated shapes");
    Ok(Json(json!({ "message": "Shapes updated successfully" })))
}

/// `DELETE /shapes/{room_id}`
pub async fn delete_shapes(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_room_id(&room_id)?;
    state.gateway.delete_shapes(&room_id).await.map_err(|e| {
        tracing::error!(room = %room_id, error = %e, "error deleting shapes");
        e
    })?;
    tracing::info!(room = %room_id, "deleted shapes");
    Ok(Json(json!({ "message": "Shapes deleted successfully" })))
}
