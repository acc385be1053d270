// ============================
// whiteboard-backend-lib/src/registry.rs
// ============================
//! Room registry: which rooms are live, how many connections each has, and
//! the handle to the actor that owns each room's state.
//!
//! Rooms are independent: the map is sharded and a room's state lives in its
//! own task, so activity in one room never waits on another.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::watch;
use whiteboard_common::{RoomId, ServerMessage, Shape};

use crate::broadcast::Delivery;
use crate::error::AppError;
use crate::gateway::PersistenceGateway;
use crate::metrics::{ROOM_ACTIVE, ROOM_CREATED, ROOM_EVICTED};
use crate::room_actor::{Member, RoomActor, RoomHandle};
use crate::transport::{ConnectionId, Outbox};

/// Returned by [`RoomRegistry::leave`] when the last member left and the
/// room's in-memory state was evicted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomClosed {
    pub room_id: RoomId,
}

struct RoomEntry {
    handle: RoomHandle,
    members: usize,
    generation: u64,
    drained: watch::Receiver<bool>,
}

/// An evicted room whose actor may still be finishing durable writes
struct Retiring {
    generation: u64,
    drained: watch::Receiver<bool>,
}

/// Manager for all live rooms
pub struct RoomRegistry {
    rooms: DashMap<RoomId, RoomEntry>,
    retiring: Arc<DashMap<RoomId, Retiring>>,
    gateway: PersistenceGateway,
    generations: AtomicU64,
}

async fn wait_drained(mut drained: watch::Receiver<bool>) {
    // a dropped sender means the actor is gone, which is as good as drained
    let _ = drained.wait_for(|done| *done).await;
}

impl RoomRegistry {
    pub fn new(gateway: PersistenceGateway) -> Self {
        RoomRegistry {
            rooms: DashMap::new(),
            retiring: Arc::new(DashMap::new()),
            gateway,
            generations: AtomicU64::new(0),
        }
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    /// Spawn the actor for a room that has no in-memory entry
    fn open_room(&self, room_id: &str) -> RoomEntry {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .retiring
            .remove(room_id)
            .map(|(_, retiring)| retiring.drained);

        let (handle, cmd_rx) = RoomHandle::channel(room_id);
        let (drained_tx, drained) = watch::channel(false);
        let actor = RoomActor::new(room_id.to_string(), self.gateway.clone());
        let retiring = Arc::clone(&self.retiring);
        let key = room_id.to_string();

        tokio::spawn(async move {
            actor.run(cmd_rx, previous).await;
            let _ = drained_tx.send(true);
            retiring.remove_if(&key, |_, r| r.generation == generation);
        });

        counter!(ROOM_CREATED).increment(1);
        gauge!(ROOM_ACTIVE).increment(1.0);
        tracing::info!(room = %room_id, generation, "room created");

        RoomEntry {
            handle,
            members: 0,
            generation,
            drained,
        }
    }

    /// Register a connection in a room, creating the room if needed.
    ///
    /// A new room loads its shapes from storage before the join is answered.
    /// The joining connection receives the snapshot as `initial_shapes`; the
    /// same snapshot is returned.
    pub async fn join_room(
        &self,
        room_id: &str,
        display_name: &str,
        outbox: Outbox,
    ) -> Result<Vec<Shape>, AppError> {
        let connection = outbox.id();
        let enqueued = {
            let mut entry = self
                .rooms
                .entry(room_id.to_string())
                .or_insert_with(|| self.open_room(room_id));
            let enqueued = entry.handle.enqueue_join(Member {
                display_name: display_name.to_string(),
                outbox,
            });
            if enqueued.is_ok() {
                entry.members += 1;
            }
            enqueued
        };
        let resp_rx = match enqueued {
            Ok(resp_rx) => resp_rx,
            Err(e) => {
                // The actor is gone; drop its entry so the next join starts a
                // fresh one.
                if self
                    .rooms
                    .remove_if(room_id, |_, room| room.members == 0)
                    .is_some()
                {
                    gauge!(ROOM_ACTIVE).decrement(1.0);
                    tracing::warn!(room = %room_id, "removed room whose actor stopped");
                }
                return Err(e);
            },
        };

        match resp_rx.await {
            Ok(snapshot) => Ok(snapshot),
            Err(_) => {
                self.leave(room_id, connection);
                Err(AppError::RoomUnavailable(room_id.to_string()))
            },
        }
    }

    /// Current shapes of a room; empty when the room is not live
    pub async fn current_shapes(&self, room_id: &str) -> Vec<Shape> {
        let Some(handle) = self.handle(room_id) else {
            return Vec::new();
        };
        match handle.snapshot().await {
            Ok(shapes) => shapes,
            Err(e) => {
                tracing::warn!(room = %room_id, error = %e, "snapshot failed");
                Vec::new()
            },
        }
    }

    /// Append a shape, broadcast the updated list to the room and queue it
    /// for storage. Returns the updated list.
    pub async fn append_shape(&self, room_id: &str, shape: Shape) -> Result<Vec<Shape>, AppError> {
        match self.handle(room_id) {
            Some(handle) => handle.append(shape).await,
            None => Ok(Vec::new()),
        }
    }

    /// Empty a room's shapes, broadcast the empty list and queue the delete
    pub async fn clear_shapes(&self, room_id: &str) -> Result<(), AppError> {
        match self.handle(room_id) {
            Some(handle) => handle.clear().await,
            None => Ok(()),
        }
    }

    /// Send `message` to every member of a room
    pub async fn broadcast(&self, room_id: &str, message: ServerMessage) -> Delivery {
        let Some(handle) = self.handle(room_id) else {
            return Delivery::default();
        };
        handle.broadcast(message).await.unwrap_or_default()
    }

    /// Remove a connection from its room.
    ///
    /// When it was the last member the room's membership and cache are
    /// evicted from memory; persisted shapes are untouched.
    pub fn leave(&self, room_id: &str, connection: ConnectionId) -> Option<RoomClosed> {
        let Entry::Occupied(mut entry) = self.rooms.entry(room_id.to_string()) else {
            return None;
        };

        entry.get().handle.leave(connection);
        let room = entry.get_mut();
        room.members = room.members.saturating_sub(1);
        if room.members > 0 {
            return None;
        }

        // Registered before the entry goes away, so a rejoin racing with the
        // eviction waits for this generation's writes.
        self.retiring.insert(
            room_id.to_string(),
            Retiring {
                generation: room.generation,
                drained: room.drained.clone(),
            },
        );
        entry.remove();

        counter!(ROOM_EVICTED).increment(1);
        gauge!(ROOM_ACTIVE).decrement(1.0);
        Some(RoomClosed {
            room_id: room_id.to_string(),
        })
    }

    /// Wait until every durable write queued for a room so far has been
    /// attempted
    pub async fn flush(&self, room_id: &str) -> Result<(), AppError> {
        if let Some(handle) = self.handle(room_id) {
            handle.flush().await?;
        }
        let retiring = self
            .retiring
            .get(room_id)
            .map(|retiring| retiring.drained.clone());
        if let Some(drained) = retiring {
            wait_drained(drained).await;
        }
        Ok(())
    }

    /// Flush every live and retiring room
    pub async fn flush_all(&self) {
        let live: Vec<(RoomId, RoomHandle)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.handle.clone()))
            .collect();
        for (room_id, handle) in live {
            if let Err(e) = handle.flush().await {
                tracing::warn!(room = %room_id, error = %e, "flush failed");
            }
        }

        let retiring: Vec<watch::Receiver<bool>> = self
            .retiring
            .iter()
            .map(|entry| entry.drained.clone())
            .collect();
        for drained in retiring {
            wait_drained(drained).await;
        }
    }

    /// Number of rooms with at least one member
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of connections registered in a room
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |entry| entry.members)
    }

    fn handle(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.get(room_id).map(|entry| entry.handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn registry() -> RoomRegistry {
        RoomRegistry::new(PersistenceGateway::new(MemoryStorage::new()))
    }

    /// Stand in an entry whose actor has already stopped
    fn insert_stopped_room(registry: &RoomRegistry, room_id: &str) {
        let (handle, cmd_rx) = RoomHandle::channel(room_id);
        drop(cmd_rx);
        let (_drained_tx, drained) = watch::channel(true);
        registry.rooms.insert(
            room_id.to_string(),
            RoomEntry {
                handle,
                members: 0,
                generation: u64::MAX,
                drained,
            },
        );
    }

    #[tokio::test]
    async fn test_join_into_stopped_room_recovers_on_retry() {
        let registry = registry();
        insert_stopped_room(&registry, "stale");

        let (outbox, _rx) = Outbox::channel(4);
        let err = registry.join_room("stale", "ana", outbox).await.unwrap_err();
        assert!(matches!(err, AppError::RoomUnavailable(_)));
        assert_eq!(registry.room_count(), 0);

        let (outbox, _rx) = Outbox::channel(4);
        let snapshot = registry.join_room("stale", "ana", outbox).await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(registry.member_count("stale"), 1);
    }

    #[tokio::test]
    async fn test_last_leave_evicts() {
        let registry = registry();
        let (first, _rx1) = Outbox::channel(4);
        let (second, _rx2) = Outbox::channel(4);
        let (first_id, second_id) = (first.id(), second.id());
        registry.join_room("r", "a", first).await.unwrap();
        registry.join_room("r", "b", second).await.unwrap();

        assert_eq!(registry.leave("r", first_id), None);
        assert_eq!(
            registry.leave("r", second_id),
            Some(RoomClosed {
                room_id: "r".to_string()
            })
        );
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.leave("r", second_id), None);
    }
}
