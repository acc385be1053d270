//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use backend_lib::{
    gateway::PersistenceGateway,
    registry::RoomRegistry,
    session::SessionCoordinator,
    storage::MemoryStorage,
    transport::{Frame, Outbox},
};
use tokio::sync::mpsc;
use whiteboard_common::{ServerMessage, Shape, ShapeKind};

/// Registry over an in-memory store the test can inspect
pub fn memory_registry() -> (Arc<RoomRegistry>, MemoryStorage) {
    let storage = MemoryStorage::new();
    let registry = Arc::new(RoomRegistry::new(PersistenceGateway::new(storage.clone())));
    (registry, storage)
}

/// A session wired to a fresh outbox
pub fn connect(registry: &Arc<RoomRegistry>) -> (SessionCoordinator, mpsc::Receiver<Frame>) {
    let (outbox, rx) = Outbox::channel(256);
    (SessionCoordinator::new(Arc::clone(registry), outbox), rx)
}

pub fn shape(x: f64) -> Shape {
    Shape {
        kind: ShapeKind::Circle,
        x,
        y: x + 1.0,
        width: 30.0,
        height: 30.0,
        color: "#ff0000".to_string(),
        stroke_width: 2.0,
    }
}

pub fn join_frame(room_id: &str, username: &str) -> String {
    serde_json::json!({
        "type": "join_room",
        "payload": { "roomId": room_id, "username": username }
    })
    .to_string()
}

pub fn draw_frame(shape: &Shape) -> String {
    serde_json::json!({
        "type": "draw_shape",
        "payload": { "shape": shape }
    })
    .to_string()
}

pub const CLEAR_FRAME: &str = r#"{"type":"clear_canvas"}"#;

/// Next frame on an outbox, failing the test after a second
pub async fn next(rx: &mut mpsc::Receiver<Frame>) -> ServerMessage {
    let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outbox closed");
    serde_json::from_str(&frame).expect("server frame is valid JSON")
}

/// Everything queued on an outbox right now
pub fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        messages.push(serde_json::from_str(&frame).expect("server frame is valid JSON"));
    }
    messages
}
