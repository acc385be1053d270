// ============================
// whiteboard-backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Sources, later ones winning: built-in defaults, an optional TOML or JSON
//! file, then `WHITEBOARD_*` environment variables.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Prefix for environment overrides, e.g. `WHITEBOARD_BIND_ADDR`
pub const ENV_PREFIX: &str = "WHITEBOARD_";

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "whiteboard.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Where room shapes are persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One directory per room under `data_dir`
    #[default]
    FlatFile,
    /// Process memory only; nothing survives a restart
    Memory,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory path
    pub data_dir: PathBuf,
    /// Log level, overridden by `RUST_LOG` when set
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
    /// Persistence backend
    pub storage_backend: StorageBackend,
    /// Frames buffered per connection before broadcasts to it are dropped
    pub outbox_capacity: usize,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            storage_backend: StorageBackend::FlatFile,
            outbox_capacity: 64,
            cors_origins: Vec::new(),
        }
    }
}

impl Settings {
    /// Load from `whiteboard.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::extract(Self::figment(Path::new(DEFAULT_CONFIG_FILE)))
    }

    /// Load from an explicit config file, which must exist
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("config file {} not found", path.display());
        }
        Self::extract(Self::figment(path))
    }

    fn figment(path: &Path) -> Figment {
        let figment = Figment::from(Serialized::defaults(Settings::default()));
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            _ => figment.merge(Toml::file(path)),
        };
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            bail!("unknown log level '{}'", self.log_level);
        }
        if self.outbox_capacity == 0 {
            bail!("outbox_capacity must be at least 1");
        }
        Ok(())
    }
}
