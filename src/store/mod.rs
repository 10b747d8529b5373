pub mod consul;
pub mod memory;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::store::consul::ConsulStore;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Consul request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Consul returned {status} for '{key}'")]
    Status {
        status: reqwest::StatusCode,
        key: String,
    },
    #[error("Store is unreachable: {0}")]
    Unavailable(String),
    #[error("Malformed value under '{key}': {reason}")]
    Malformed { key: String, reason: String },
    #[error("Invalid Consul URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// A single entry returned by [`KvStore::list`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}

/// Generic ordered key-value backend.
///
/// Keys are `/`-separated paths. `list` treats its argument as a directory:
/// it returns every entry whose key starts with `{prefix}/`, in key order.
/// Each operation is atomic on its own; nothing spans several keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>, StoreError>;
    /// Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// `telegram/chats` -> `telegram/chats/`
pub(crate) fn directory(prefix: &str) -> String {
    format!("{}/", prefix.trim_end_matches('/'))
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Embedded SQLite file
    #[default]
    #[value(alias = "bolt")]
    #[serde(alias = "bolt")]
    Sqlite,
    /// Consul KV over HTTP
    Consul,
    /// Process memory, lost on restart
    Memory,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Sqlite => write!(f, "sqlite"),
            StoreKind::Consul => write!(f, "consul"),
            StoreKind::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub db_path: PathBuf,
    pub consul_url: String,
}

/// Open the backend selected in the configuration
pub fn open(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match config.kind {
        StoreKind::Sqlite => Arc::new(SqliteStore::open(&config.db_path).with_context(|| {
            format!("Failed to open SQLite store at {}", config.db_path.display())
        })?),
        StoreKind::Consul => Arc::new(
            ConsulStore::new(&config.consul_url)
                .with_context(|| format!("Failed to set up Consul store at {}", config.consul_url))?,
        ),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };

    info!("Using {} chat store", config.kind);
    Ok(store)
}
