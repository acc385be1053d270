//! Per-connection outbound capability.
//!
//! The socket itself stays with the connection task in [`crate::ws_router`];
//! everything else only gets an [`Outbox`] that queues text frames for it.
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Identifies one client connection for its whole lifetime
pub type ConnectionId = Uuid;

/// A serialized text frame, shared between all recipients of a broadcast
pub type Frame = Arc<str>;

/// Why a frame was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection is not draining its queue fast enough
    Full,
    /// The connection has gone away
    Closed,
}

/// Sending half of a connection's outbound queue
#[derive(Clone, Debug)]
pub struct Outbox {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
}

impl Outbox {
    /// Create an outbox for a new connection together with the receiver its
    /// writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a frame without waiting
    pub fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
