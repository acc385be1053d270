// ============================
// whiteboard-backend-lib/src/lib.rs
// ============================
//! Core functionality for the collaborative whiteboard server.
//!
//! Connections join named rooms; each room keeps its shape list in memory,
//! fans every change out to its members and persists it in the background.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod registry;
mod room_actor;
pub mod session;
pub mod storage;
pub mod transport;
pub mod ws_router;

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{Settings, StorageBackend};
use crate::gateway::PersistenceGateway;
use crate::registry::RoomRegistry;
use crate::storage::{FlatFileStorage, MemoryStorage, ShapeStore};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings the server was started with
    pub settings: Arc<Settings>,
    /// Live rooms
    pub registry: Arc<RoomRegistry>,
    /// Durable shape storage, shared by the realtime and REST paths
    pub gateway: PersistenceGateway,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Create a new application state on top of `store`
    pub fn new(store: Arc<dyn ShapeStore>, settings: Settings) -> Self {
        let gateway = PersistenceGateway::from_store(store);
        let registry = Arc::new(RoomRegistry::new(gateway.clone()));
        let (shutdown, _) = watch::channel(false);
        Self {
            settings: Arc::new(settings),
            registry,
            gateway,
            shutdown: Arc::new(shutdown),
        }
    }

    /// Ask every open WebSocket session to close. Upgraded connections are
    /// not covered by the HTTP server's graceful shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Receiver that turns `true` once [`AppState::request_shutdown`] is called
    pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Create the application state with the storage backend the settings
    /// ask for
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn ShapeStore> = match settings.storage_backend {
            StorageBackend::FlatFile => Arc::new(FlatFileStorage::new(&settings.data_dir)?),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::new(store, settings))
    }
}
