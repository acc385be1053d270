// ==================
// crates/backend-lib/src/session.rs
// ==================
//! Per-connection protocol state machine.
//!
//! A session starts `Unjoined`, moves to `Joined` on its first
//! `join_room`, and ends `Closed` when the transport goes away. Protocol
//! errors are answered on the offending connection only and never change
//! state; storage problems never reach the client at all.
use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use whiteboard_common::{ClientMessage, ProtocolError, RoomId, ServerMessage, Shape};

use crate::broadcast;
use crate::error::AppError;
use crate::metrics::{CANVAS_CLEARED, SHAPE_DRAWN, SHAPE_FALLBACK};
use crate::registry::{RoomClosed, RoomRegistry};
use crate::transport::{ConnectionId, Outbox};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined {
        room_id: RoomId,
        display_name: String,
    },
    Closed,
}

/// Protocol state of one connection
#[derive(Debug, Clone)]
pub struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    pub fn new(id: ConnectionId) -> Self {
        Session {
            id,
            state: SessionState::Unjoined,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn room_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { room_id, .. } => Some(room_id),
            _ => None,
        }
    }
}

/// Errors reported back to the connection that caused them
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("draw or clear before joining a room")]
    NotInRoom,

    #[error("already joined room {0}")]
    AlreadyJoined(RoomId),

    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Room(#[from] AppError),
}

impl SessionError {
    /// Text sent to the client in an `error` frame
    pub fn client_message(&self) -> String {
        match self {
            SessionError::Protocol(e) => e.client_message().to_string(),
            SessionError::NotInRoom => "You are not in a room.".to_string(),
            SessionError::AlreadyJoined(room_id) => format!("Already joined room {room_id}"),
            SessionError::Closed => "Connection is closed".to_string(),
            SessionError::Room(e) => e.sanitized_message(),
        }
    }
}

/// Drives one connection's session against the room registry
pub struct SessionCoordinator {
    registry: Arc<RoomRegistry>,
    outbox: Outbox,
    session: Session,
}

impl SessionCoordinator {
    pub fn new(registry: Arc<RoomRegistry>, outbox: Outbox) -> Self {
        let session = Session::new(outbox.id());
        Self {
            registry,
            outbox,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Handle one inbound text frame, replying with an `error` frame when it
    /// is rejected
    pub async fn handle_frame(&mut self, text: &str) {
        if let Err(e) = self.process(text).await {
            tracing::debug!(connection = %self.session.id, error = %e, "rejected client message");
            broadcast::send_to(&self.outbox, &ServerMessage::error(e.client_message()));
        }
    }

    /// Decode and apply one inbound text frame
    pub async fn process(&mut self, text: &str) -> Result<(), SessionError> {
        let message = ClientMessage::decode(text)?;
        self.dispatch(message).await
    }

    pub async fn dispatch(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        if self.session.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        match message {
            ClientMessage::JoinRoom { room_id, username } => self.join(room_id, username).await,
            ClientMessage::DrawShape { shape } => self.draw(&shape).await,
            ClientMessage::ClearCanvas => self.clear().await,
        }
    }

    async fn join(&mut self, room_id: RoomId, display_name: String) -> Result<(), SessionError> {
        if let Some(current) = self.session.room_id() {
            return Err(SessionError::AlreadyJoined(current.to_string()));
        }

        // The registry queues `initial_shapes` on our outbox ahead of any
        // update that follows the join.
        let snapshot = self
            .registry
            .join_room(&room_id, &display_name, self.outbox.clone())
            .await?;
        tracing::debug!(
            connection = %self.session.id,
            room = %room_id,
            shapes = snapshot.len(),
            "sent initial shapes"
        );

        self.session.state = SessionState::Joined {
            room_id,
            display_name,
        };
        Ok(())
    }

    async fn draw(&mut self, raw: &Value) -> Result<(), SessionError> {
        let room_id = self.session.room_id().ok_or(SessionError::NotInRoom)?;

        let shape = match Shape::from_value(raw) {
            Ok(shape) => shape,
            Err(e) => {
                tracing::warn!(
                    connection = %self.session.id,
                    room = %room_id,
                    error = %e,
                    "invalid shape from client, using fallback"
                );
                counter!(SHAPE_FALLBACK).increment(1);
                Shape::fallback()
            },
        };

        let shapes = self.registry.append_shape(room_id, shape).await?;
        counter!(SHAPE_DRAWN).increment(1);
        tracing::debug!(room = %room_id, count = shapes.len(), "shape drawn");
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), SessionError> {
        let room_id = self.session.room_id().ok_or(SessionError::NotInRoom)?;
        self.registry.clear_shapes(room_id).await?;
        counter!(CANVAS_CLEARED).increment(1);
        tracing::info!(room = %room_id, connection = %self.session.id, "canvas cleared");
        Ok(())
    }

    /// Transport closed or failed. Safe to call more than once.
    pub fn close(&mut self) -> Option<RoomClosed> {
        let previous = std::mem::replace(&mut self.session.state, SessionState::Closed);
        let SessionState::Joined { room_id, .. } = previous else {
            return None;
        };
        self.registry.leave(&room_id, self.session.id)
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}
