//! Persistence of the routing table.
//!
//! # Data Flow
//! ```text
//! Flat file:
//!     RoutingTable
//!     → document.rs (render TOML: http.routers / http.services / routekv.routes)
//!     → atomic.rs (temp file next to destination → fsync → rename)
//!
//! Hierarchical KV:
//!     RoutingTable
//!     → kv/mod.rs (diff against stored route records, group ops per route)
//!     → kv client (memory / consul / etcd), one transaction per group
//! ```
//!
//! # Design Decisions
//! - Every commit writes the full table; no incremental state is trusted
//! - Readers of the file never lock it and rely on atomic rename alone
//! - A route is never split across two KV transactions
//! - Load errors are always propagated, never replaced by an empty table

pub mod atomic;
pub mod document;
pub mod file;
pub mod kv;
pub mod static_config;

use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{KvBackendKind, StorageMode, StoreConfig};
use crate::routing::KeySchema;
use crate::table::RoutingTable;

pub use atomic::AtomicWriter;
pub use file::FilePersistence;
pub use kv::{ConsulKv, EtcdKv, KvClient, KvOp, KvPersistence, MemoryKv};

/// Errors raised while committing or loading the table.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Temp-file write, fsync or rename failed.
    #[error("Write to {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Read of {} failed: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Route record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Parse error in {location}: {source}")]
    Parse {
        location: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Parsed, but not a table this crate could have written.
    #[error("Corrupt routing table in {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("Commit timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Backing store rejected request: {0}")]
    Rejected(String),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// A backing store for the routing table.
#[async_trait]
pub trait Persistence: Send + Sync {
    fn mode(&self) -> StorageMode;

    /// Key layout used for every record of this store.
    fn schema(&self) -> &KeySchema;

    /// Alias designator used for every record of this store.
    fn designator(&self) -> &str;

    /// Make `table` the durable state, replacing whatever was there.
    async fn commit(&self, table: &RoutingTable) -> PersistenceResult<()>;

    /// Rebuild the table from the backing store.
    async fn load(&self) -> PersistenceResult<RoutingTable>;
}

/// Build the backing store selected by `config`.
pub fn connect(config: &StoreConfig) -> PersistenceResult<Arc<dyn Persistence>> {
    let designator = config.storage.designator.clone();

    match config.storage.mode {
        StorageMode::File => Ok(Arc::new(FilePersistence::new(
            config.file.path.clone(),
            config.provider.clone(),
            designator,
        ))),
        StorageMode::Kv => {
            let timeout = Duration::from_millis(config.kv.timeout_ms);
            let client: Arc<dyn KvClient> = match config.kv.backend {
                KvBackendKind::Memory => Arc::new(MemoryKv::new()),
                KvBackendKind::Consul => Arc::new(ConsulKv::new(
                    &config.kv.endpoint,
                    config.kv.token.clone(),
                    timeout,
                )?),
                KvBackendKind::Etcd => Arc::new(EtcdKv::new(&config.kv.endpoint, timeout)?),
            };

            Ok(Arc::new(KvPersistence::new(
                client,
                config.key_schema(),
                config.kv.meta_prefix.clone(),
                config.provider.clone(),
                designator,
                timeout,
            )))
        }
    }
}
