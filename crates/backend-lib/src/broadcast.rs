//! Best-effort fan-out of server messages.
//!
//! A message is serialized once and the same frame is queued on every
//! recipient. Delivery never waits: a closed or backed-up connection is
//! skipped, and its close handler reconciles membership separately.
use metrics::counter;
use whiteboard_common::ServerMessage;

use crate::metrics::{BROADCAST_DELIVERED, BROADCAST_SKIPPED};
use crate::transport::{DeliveryError, Frame, Outbox};

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub skipped: usize,
}

fn encode(message: &ServerMessage) -> Option<Frame> {
    match message.encode() {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize server message");
            None
        },
    }
}

/// Queue `message` on a single connection
pub fn send_to(outbox: &Outbox, message: &ServerMessage) -> bool {
    let Some(frame) = encode(message) else {
        return false;
    };
    match outbox.send(frame) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(connection = %outbox.id(), reason = ?e, "dropped direct message");
            false
        },
    }
}

/// Queue `message` on every open recipient
pub fn broadcast<'a, I>(recipients: I, message: &ServerMessage) -> Delivery
where
    I: IntoIterator<Item = &'a Outbox>,
{
    let mut delivery = Delivery::default();
    let Some(frame) = encode(message) else {
        return delivery;
    };

    for outbox in recipients {
        if !outbox.is_open() {
            delivery.skipped += 1;
            continue;
        }
        match outbox.send(frame.clone()) {
            Ok(()) => delivery.delivered += 1,
            Err(DeliveryError::Full) => {
                tracing::warn!(connection = %outbox.id(), "outbox full, frame dropped");
                delivery.skipped += 1;
            },
            Err(DeliveryError::Closed) => delivery.skipped += 1,
        }
    }

    counter!(BROADCAST_DELIVERED).increment(delivery.delivered as u64);
    counter!(BROADCAST_SKIPPED).increment(delivery.skipped as u64);
    delivery
}
