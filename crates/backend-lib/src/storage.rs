// ============================
// whiteboard-backend-lib/src/storage.rs
// ============================
//! Storage abstraction with flat-file and in-memory implementations.
//!
//! A store keeps a "room row" per room plus the ordered list of shape
//! records belonging to it. Shape payloads are stored raw so that whatever a
//! store holds, valid or not, can be read back; validation belongs to
//! [`crate::gateway::PersistenceGateway`].
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs as tokio_fs, io::AsyncWriteExt};
use uuid::Uuid;
use whiteboard_common::Shape;

use crate::error::AppError;

/// One persisted shape
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShapeRecord {
    pub id: Uuid,
    pub room_id: String,
    /// Kind tag copied out of `data` for inspection without parsing it
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Shape payload as received
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

impl ShapeRecord {
    pub fn new(room_id: &str, shape: &Shape) -> Self {
        Self::from_value(room_id, shape.to_value())
    }

    pub fn from_value(room_id: &str, data: Value) -> Self {
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        ShapeRecord {
            id: Uuid::new_v4(),
            room_id: room_id.to_string(),
            kind,
            data,
            created_at: Utc::now(),
        }
    }
}

/// Persisted room row
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for durable shape stores
#[async_trait]
pub trait ShapeStore: Send + Sync {
    /// Create the room row if it does not exist yet
    async fn ensure_room(&self, room_id: &str) -> Result<(), AppError>;

    /// All shape records for a room, in insertion order
    async fn read_records(&self, room_id: &str) -> Result<Vec<ShapeRecord>, AppError>;

    /// Replace every shape record of a room. Either all of `records` become
    /// visible or none of them do.
    async fn replace_records(
        &self,
        room_id: &str,
        records: Vec<ShapeRecord>,
    ) -> Result<(), AppError>;

    /// Remove every shape record of a room, keeping the room row
    async fn delete_records(&self, room_id: &str) -> Result<(), AppError>;
}

const ROOMS_DIR: &str = "rooms";
const ROOM_FILE: &str = "room.json";
const SHAPES_FILE: &str = "shapes.json";

/// Flat-file implementation of the ShapeStore trait.
///
/// Layout: `<root>/rooms/r-<base64url(room id)>/{room.json,shapes.json}`.
/// Room ids are client supplied, so they never appear in paths verbatim.
#[derive(Clone)]
pub struct FlatFileStorage {
    root: PathBuf,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(ROOMS_DIR))?;
        Ok(Self { root })
    }

    fn room_dir(&self, room_id: &str) -> PathBuf {
        self.root
            .join(ROOMS_DIR)
            .join(format!("r-{}", URL_SAFE_NO_PAD.encode(room_id)))
    }
}

#[async_trait]
impl ShapeStore for FlatFileStorage {
    async fn ensure_room(&self, room_id: &str) -> Result<(), AppError> {
        let dir = self.room_dir(room_id);
        tokio_fs::create_dir_all(&dir).await?;

        let opened = tokio_fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dir.join(ROOM_FILE))
            .await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let room = RoomRecord {
            id: room_id.to_string(),
            created_at: Utc::now(),
        };
        file.write_all(serde_json::to_string_pretty(&room)?.as_bytes())
            .await?;
        file.flush().await?;
        tracing::info!(room = %room_id, "created room row");
        Ok(())
    }

    async fn read_records(&self, room_id: &str) -> Result<Vec<ShapeRecord>, AppError> {
        let path = self.room_dir(room_id).join(SHAPES_FILE);
        let content = match tokio_fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn replace_records(
        &self,
        room_id: &str,
        records: Vec<ShapeRecord>,
    ) -> Result<(), AppError> {
        let dir = self.room_dir(room_id);
        tokio_fs::create_dir_all(&dir).await?;

        // Write the new list beside the old one, then swap it in with a rename.
        let tmp = dir.join(format!(".{SHAPES_FILE}.{}.tmp", Uuid::new_v4()));
        let json = serde_json::to_vec(&records)?;
        let written = async {
            let mut file = tokio_fs::File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
            tokio_fs::rename(&tmp, dir.join(SHAPES_FILE)).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio_fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_records(&self, room_id: &str) -> Result<(), AppError> {
        match tokio_fs::remove_file(self.room_dir(room_id).join(SHAPES_FILE)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    rooms: HashMap<String, RoomRecord>,
    shapes: HashMap<String, Vec<ShapeRecord>>,
}

/// In-process store. Contents are lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a storage error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Append a raw payload without validation
    pub fn insert_raw(&self, room_id: &str, data: Value) {
        let mut state = self.state.write();
        state.rooms.entry(room_id.to_string()).or_insert_with(|| RoomRecord {
            id: room_id.to_string(),
            created_at: Utc::now(),
        });
        state
            .shapes
            .entry(room_id.to_string())
            .or_default()
            .push(ShapeRecord::from_value(room_id, data));
    }

    pub fn has_room(&self, room_id: &str) -> bool {
        self.state.read().rooms.contains_key(room_id)
    }

    pub fn record_count(&self, room_id: &str) -> usize {
        self.state.read().shapes.get(room_id).map_or(0, Vec::len)
    }

    fn check(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Storage("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ShapeStore for MemoryStorage {
    async fn ensure_room(&self, room_id: &str) -> Result<(), AppError> {
        self.check()?;
        self.state
            .write()
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomRecord {
                id: room_id.to_string(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn read_records(&self, room_id: &str) -> Result<Vec<ShapeRecord>, AppError> {
        self.check()?;
        Ok(self
            .state
            .read()
            .shapes
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_records(
        &self,
        room_id: &str,
        records: Vec<ShapeRecord>,
    ) -> Result<(), AppError> {
        self.check()?;
        self.state
            .write()
            .shapes
            .insert(room_id.to_string(), records);
        Ok(())
    }

    async fn delete_records(&self, room_id: &str) -> Result<(), AppError> {
        self.check()?;
        self.state.write().shapes.remove(room_id);
        Ok(())
    }
}
