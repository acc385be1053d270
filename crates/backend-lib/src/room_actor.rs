// ============================
// whiteboard-backend-lib/src/room_actor.rs
// ============================
//! One task per live room.
//!
//! The actor exclusively owns the room's membership and shape cache, so every
//! mutation is applied, and its broadcast queued, in the order commands
//! arrive on its channel. Durable writes go to a separate persistence lane and
//! never hold up the room.
use std::collections::HashMap;

use metrics::counter;
use tokio::sync::{mpsc, oneshot, watch};
use whiteboard_common::{RoomId, ServerMessage, Shape};

use crate::broadcast::{self, Delivery};
use crate::error::AppError;
use crate::gateway::PersistenceGateway;
use crate::metrics::PERSIST_FAILED;
use crate::transport::{ConnectionId, Outbox};

/// A connection registered in a room
#[derive(Debug, Clone)]
pub struct Member {
    pub display_name: String,
    pub outbox: Outbox,
}

/// Message sent *into* the actor
#[derive(Debug)]
pub(crate) enum RoomCmd {
    Join {
        member: Member,
        resp_tx: oneshot::Sender<Vec<Shape>>,
    },
    Leave {
        connection: ConnectionId,
    },
    Append {
        shape: Shape,
        resp_tx: oneshot::Sender<Vec<Shape>>,
    },
    Clear {
        resp_tx: oneshot::Sender<()>,
    },
    Snapshot {
        resp_tx: oneshot::Sender<Vec<Shape>>,
    },
    Broadcast {
        message: ServerMessage,
        resp_tx: oneshot::Sender<Delivery>,
    },
    Flush {
        resp_tx: oneshot::Sender<()>,
    },
}

/// Handle that other components keep: the actor's command channel
#[derive(Clone)]
pub(crate) struct RoomHandle {
    room_id: RoomId,
    cmd_tx: mpsc::UnboundedSender<RoomCmd>,
}

impl RoomHandle {
    pub(crate) fn channel(room_id: &str) -> (Self, mpsc::UnboundedReceiver<RoomCmd>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        (
            RoomHandle {
                room_id: room_id.to_string(),
                cmd_tx,
            },
            cmd_rx,
        )
    }

    fn send(&self, cmd: RoomCmd) -> Result<(), AppError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| AppError::RoomUnavailable(self.room_id.clone()))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCmd,
    ) -> Result<T, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(make(resp_tx))?;
        resp_rx
            .await
            .map_err(|_| AppError::RoomUnavailable(self.room_id.clone()))
    }

    /// Queue a join without waiting, so the caller can do it while holding
    /// the registry entry
    pub(crate) fn enqueue_join(&self, member: Member) -> Result<oneshot::Receiver<Vec<Shape>>, AppError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.send(RoomCmd::Join { member, resp_tx })?;
        Ok(resp_rx)
    }

    pub(crate) fn leave(&self, connection: ConnectionId) {
        // a gone actor has no membership left to update
        let _ = self.send(RoomCmd::Leave { connection });
    }

    pub(crate) async fn append(&self, shape: Shape) -> Result<Vec<Shape>, AppError> {
        self.request(|resp_tx| RoomCmd::Append { shape, resp_tx }).await
    }

    pub(crate) async fn clear(&self) -> Result<(), AppError> {
        self.request(|resp_tx| RoomCmd::Clear { resp_tx }).await
    }

    pub(crate) async fn snapshot(&self) -> Result<Vec<Shape>, AppError> {
        self.request(|resp_tx| RoomCmd::Snapshot { resp_tx }).await
    }

    pub(crate) async fn broadcast(&self, message: ServerMessage) -> Result<Delivery, AppError> {
        self.request(|resp_tx| RoomCmd::Broadcast { message, resp_tx })
            .await
    }

    pub(crate) async fn flush(&self) -> Result<(), AppError> {
        self.request(|resp_tx| RoomCmd::Flush { resp_tx }).await
    }
}

/// Full-state durable write
#[derive(Debug)]
enum Write {
    Replace(Vec<Shape>),
    Clear,
}

#[derive(Debug)]
enum PersistJob {
    Write(Write),
    Flush(oneshot::Sender<()>),
}

/// Ordered background queue of durable writes for one room
struct PersistLane {
    tx: mpsc::UnboundedSender<PersistJob>,
    task: tokio::task::JoinHandle<()>,
}

impl PersistLane {
    fn spawn(room_id: RoomId, gateway: PersistenceGateway) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_lane(room_id, gateway, rx));
        PersistLane { tx, task }
    }

    fn submit(&self, job: PersistJob) {
        if self.tx.send(job).is_err() {
            tracing::error!("persistence lane stopped, write dropped");
        }
    }

    /// Let queued writes finish, then stop
    async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "persistence lane failed");
        }
    }
}

async fn run_lane(
    room_id: RoomId,
    gateway: PersistenceGateway,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
) {
    while let Some(first) = rx.recv().await {
        // Every write carries the room's full state, so only the newest
        // queued one needs to reach storage.
        let mut latest = None;
        let mut waiters = Vec::new();
        let mut next = Some(first);
        while let Some(job) = next {
            match job {
                PersistJob::Write(write) => latest = Some(write),
                PersistJob::Flush(resp_tx) => waiters.push(resp_tx),
            }
            next = rx.try_recv().ok();
        }

        if let Some(write) = latest {
            apply_write(&room_id, &gateway, write).await;
        }
        for resp_tx in waiters {
            let _ = resp_tx.send(());
        }
    }
}

async fn apply_write(room_id: &str, gateway: &PersistenceGateway, write: Write) {
    let result = match &write {
        Write::Replace(shapes) => gateway.replace_with(room_id, shapes).await,
        Write::Clear => gateway.delete_shapes(room_id).await,
    };
    match result {
        Ok(()) => tracing::debug!(room = %room_id, ?write, "persisted room shapes"),
        Err(e) => {
            counter!(PERSIST_FAILED).increment(1);
            tracing::error!(room = %room_id, error = %e, "error saving shapes to storage");
        },
    }
}

pub(crate) struct RoomActor {
    room_id: RoomId,
    gateway: PersistenceGateway,
    members: HashMap<ConnectionId, Member>,
    shapes: Vec<Shape>,
}

impl RoomActor {
    pub(crate) fn new(room_id: RoomId, gateway: PersistenceGateway) -> Self {
        RoomActor {
            room_id,
            gateway,
            members: HashMap::new(),
            shapes: Vec::new(),
        }
    }

    /// Populate the cache from storage. A failed load leaves the room empty
    /// rather than refusing the join.
    async fn load(&mut self) {
        match self.gateway.load_shapes(&self.room_id).await {
            Ok(shapes) => {
                tracing::info!(
                    room = %self.room_id,
                    count = shapes.len(),
                    "loaded shapes from storage"
                );
                self.shapes = shapes;
            },
            Err(e) => {
                tracing::error!(
                    room = %self.room_id,
                    error = %e,
                    "error loading shapes from storage, starting empty"
                );
                self.shapes = Vec::new();
            },
        }
    }

    /// Run until every handle is dropped.
    ///
    /// `previous` is the drained signal of an earlier generation of this room
    /// that may still be writing; loading waits for it.
    pub(crate) async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<RoomCmd>,
        previous: Option<watch::Receiver<bool>>,
    ) {
        if let Some(mut previous) = previous {
            let _ = previous.wait_for(|drained| *drained).await;
        }
        self.load().await;

        let lane = PersistLane::spawn(self.room_id.clone(), self.gateway.clone());
        while let Some(cmd) = rx.recv().await {
            self.handle(cmd, &lane);
        }

        lane.shutdown().await;
        tracing::info!(room = %self.room_id, "room removed from memory (no more clients)");
    }

    fn handle(&mut self, cmd: RoomCmd, lane: &PersistLane) {
        match cmd {
            RoomCmd::Join { member, resp_tx } => {
                let connection = member.outbox.id();
                tracing::info!(
                    room = %self.room_id,
                    %connection,
                    username = %member.display_name,
                    "client joined room"
                );
                broadcast::send_to(
                    &member.outbox,
                    &ServerMessage::InitialShapes {
                        shapes: self.shapes.clone(),
                    },
                );
                self.members.insert(connection, member);
                let _ = resp_tx.send(self.shapes.clone());
            },
            RoomCmd::Leave { connection } => {
                if let Some(member) = self.members.remove(&connection) {
                    tracing::info!(
                        room = %self.room_id,
                        %connection,
                        username = %member.display_name,
                        "client left room"
                    );
                }
            },
            RoomCmd::Append { shape, resp_tx } => {
                self.shapes.push(shape);
                self.fan_out(ServerMessage::UpdateShapes {
                    shapes: self.shapes.clone(),
                });
                lane.submit(PersistJob::Write(Write::Replace(self.shapes.clone())));
                let _ = resp_tx.send(self.shapes.clone());
            },
            RoomCmd::Clear { resp_tx } => {
                self.shapes.clear();
                self.fan_out(ServerMessage::UpdateShapes { shapes: Vec::new() });
                lane.submit(PersistJob::Write(Write::Clear));
                let _ = resp_tx.send(());
            },
            RoomCmd::Snapshot { resp_tx } => {
                let _ = resp_tx.send(self.shapes.clone());
            },
            RoomCmd::Broadcast { message, resp_tx } => {
                let _ = resp_tx.send(self.fan_out(message));
            },
            RoomCmd::Flush { resp_tx } => lane.submit(PersistJob::Flush(resp_tx)),
        }
    }

    fn fan_out(&self, message: ServerMessage) -> Delivery {
        let delivery = broadcast::broadcast(self.members.values().map(|m| &m.outbox), &message);
        tracing::debug!(
            room = %self.room_id,
            delivered = delivery.delivered,
            skipped = delivery.skipped,
            "broadcast to room"
        );
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::transport::Frame;

    fn spawn(storage: MemoryStorage) -> RoomHandle {
        let (handle, rx) = RoomHandle::channel("test-room");
        let actor = RoomActor::new("test-room".to_string(), PersistenceGateway::new(storage));
        tokio::spawn(actor.run(rx, None));
        handle
    }

    fn decode(frame: Frame) -> ServerMessage {
        serde_json::from_str(&frame).unwrap()
    }

    fn member(name: &str) -> (Member, mpsc::Receiver<Frame>) {
        let (outbox, rx) = Outbox::channel(16);
        (
            Member {
                display_name: name.to_string(),
                outbox,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_join_sends_snapshot_to_joiner() {
        let storage = MemoryStorage::new();
        storage.insert_raw("test-room", Shape::fallback().to_value());
        let handle = spawn(storage);

        let (alice, mut alice_rx) = member("alice");
        let snapshot = handle.enqueue_join(alice).unwrap().await.unwrap();
        assert_eq!(snapshot, vec![Shape::fallback()]);
        assert_eq!(
            decode(alice_rx.recv().await.unwrap()),
            ServerMessage::InitialShapes {
                shapes: vec![Shape::fallback()]
            }
        );
    }

    #[tokio::test]
    async fn test_append_broadcasts_and_persists() {
        let storage = MemoryStorage::new();
        let handle = spawn(storage.clone());
        let (alice, mut alice_rx) = member("alice");
        let (bob, mut bob_rx) = member("bob");
        handle.enqueue_join(alice).unwrap().await.unwrap();
        handle.enqueue_join(bob).unwrap().await.unwrap();
        alice_rx.recv().await.unwrap();
        bob_rx.recv().await.unwrap();

        let shapes = handle.append(Shape::fallback()).await.unwrap();
        assert_eq!(shapes.len(), 1);
        let expected = ServerMessage::UpdateShapes { shapes };
        assert_eq!(decode(alice_rx.recv().await.unwrap()), expected);
        assert_eq!(decode(bob_rx.recv().await.unwrap()), expected);

        handle.flush().await.unwrap();
        assert_eq!(storage.record_count("test-room"), 1);
    }

    #[tokio::test]
    async fn test_left_member_gets_nothing() {
        let handle = spawn(MemoryStorage::new());
        let (alice, mut alice_rx) = member("alice");
        let connection = alice.outbox.id();
        handle.enqueue_join(alice).unwrap().await.unwrap();
        alice_rx.recv().await.unwrap();

        handle.leave(connection);
        handle.clear().await.unwrap();
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_load_starts_empty_and_failed_write_keeps_cache() {
        let storage = MemoryStorage::new();
        storage.set_failing(true);
        let handle = spawn(storage.clone());

        let (alice, _alice_rx) = member("alice");
        assert!(handle.enqueue_join(alice).unwrap().await.unwrap().is_empty());

        handle.append(Shape::fallback()).await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().len(), 1);
        assert_eq!(storage.record_count("test-room"), 0);
    }
}
