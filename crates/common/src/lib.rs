// ================
// common/src/lib.rs
// ================
//! Common types shared by the whiteboard server and its clients.
//! This module defines the realtime protocol messages and the shape model.

pub mod shape;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use shape::{Shape, ShapeError, ShapeKind};

/// Opaque, client-supplied room identifier
pub type RoomId = String;

/// Frame type tags understood by the server
pub const JOIN_ROOM: &str = "join_room";
pub const DRAW_SHAPE: &str = "draw_shape";
pub const CLEAR_CANVAS: &str = "clear_canvas";

/// Reasons a client frame could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not JSON, not an object, no string `type`, or a payload that does not
    /// fit its type
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Well-formed frame with a `type` the server doesn't know
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

impl ProtocolError {
    /// Text reported to the client in an `error` frame
    pub fn client_message(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "Invalid message format.",
            ProtocolError::UnknownType(_) => "Unknown message type",
        }
    }
}

/// Messages sent from client to server.
///
/// On the wire every frame is `{"type": ..., "payload": {...}}`; `payload`
/// may be omitted for `clear_canvas`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join a room under a display name
    JoinRoom { room_id: RoomId, username: String },
    /// Append a shape to the room canvas. The shape is kept untyped until
    /// the session validates it.
    DrawShape { shape: Value },
    /// Remove every shape from the room canvas
    ClearCanvas,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRoomPayload {
    room_id: String,
    #[serde(default)]
    username: String,
}

#[derive(Deserialize)]
struct DrawShapePayload {
    shape: Value,
}

impl ClientMessage {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let Value::Object(mut frame) = value else {
            return Err(ProtocolError::Malformed("frame is not an object".to_string()));
        };
        let Some(Value::String(msg_type)) = frame.remove("type") else {
            return Err(ProtocolError::Malformed("missing message type".to_string()));
        };
        let payload = frame.remove("payload").unwrap_or(Value::Null);

        match msg_type.as_str() {
            JOIN_ROOM => {
                let join: JoinRoomPayload = serde_json::from_value(payload)
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                Ok(ClientMessage::JoinRoom {
                    room_id: join.room_id,
                    username: join.username,
                })
            },
            DRAW_SHAPE => {
                let draw: DrawShapePayload = serde_json::from_value(payload)
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                Ok(ClientMessage::DrawShape { shape: draw.shape })
            },
            CLEAR_CANVAS => Ok(ClientMessage::ClearCanvas),
            _ => Err(ProtocolError::UnknownType(msg_type)),
        }
    }

    /// Encode as a text frame, the way the browser client sends it
    pub fn encode(&self) -> String {
        let frame = match self {
            ClientMessage::JoinRoom { room_id, username } => serde_json::json!({
                "type": JOIN_ROOM,
                "payload": { "roomId": room_id, "username": username },
            }),
            ClientMessage::DrawShape { shape } => serde_json::json!({
                "type": DRAW_SHAPE,
                "payload": { "shape": shape },
            }),
            ClientMessage::ClearCanvas => serde_json::json!({ "type": CLEAR_CANVAS }),
        };
        frame.to_string()
    }
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot sent once, to the joining connection only
    InitialShapes { shapes: Vec<Shape> },
    /// Full authoritative shape list, sent to the room on every mutation
    UpdateShapes { shapes: Vec<Shape> },
    /// Protocol violation or state error
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
