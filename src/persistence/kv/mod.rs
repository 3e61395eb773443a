//! Hierarchical key-value backing store.
//!
//! # Responsibilities
//! - Turn a routing table into per-route groups of put/delete operations
//! - Remove every key of routes that disappeared from the table
//! - Rebuild the table from the stored route records
//!
//! # Design Decisions
//! - The KV store is the canonical state; there is no local cache file
//! - Each route keeps a JSON record under `<meta_prefix>routes/<alias>`; it is
//!   written first and deleted last, so a half-applied route is always found
//!   and cleaned up by the next commit
//! - Operations of one route always share a transaction
//! - No key is both written and deleted in one transaction (etcd rejects it)

pub mod consul;
pub mod etcd;
mod http;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, StorageMode};
use crate::persistence::{Persistence, PersistenceError, PersistenceResult};
use crate::routing::{decode, to_alias, KeySchema};
use crate::table::{RouteRecord, RoutingTable};

pub use consul::ConsulKv;
pub use etcd::EtcdKv;
pub use memory::MemoryKv;

/// One write in a KV transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put { key: String, value: String },
    Delete { key: String },
    /// Delete every key starting with `prefix`.
    DeleteTree { prefix: String },
}

/// Minimal KV API needed by [`KvPersistence`].
#[async_trait]
pub trait KvClient: Send + Sync {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>>;

    /// All keys under `prefix` with their values.
    async fn list(&self, prefix: &str) -> PersistenceResult<BTreeMap<String, String>>;

    /// Apply `ops` in order, as one transaction where the backend has them.
    async fn apply(&self, ops: &[KvOp]) -> PersistenceResult<()>;

    /// Largest transaction the backend accepts.
    fn max_txn_ops(&self) -> usize;
}

/// Route record stored next to the proxy keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRoute {
    pub routespec: String,
    pub target: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub updated_at: u64,
    /// Entry point keys written for this route.
    #[serde(default)]
    pub entrypoints: usize,
}

/// Stores the table as individual proxy keys in a KV store.
pub struct KvPersistence {
    client: Arc<dyn KvClient>,
    schema: KeySchema,
    /// Normalized, ends with `/`.
    meta_prefix: String,
    provider: ProviderConfig,
    designator: String,
    timeout: Duration,
}

impl KvPersistence {
    pub fn new(
        client: Arc<dyn KvClient>,
        schema: KeySchema,
        meta_prefix: String,
        provider: ProviderConfig,
        designator: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            schema,
            meta_prefix,
            provider,
            designator,
            timeout,
        }
    }

    fn meta_root(&self) -> String {
        format!("{}routes/", self.meta_prefix)
    }

    /// Key of the stored record for `alias`.
    pub fn meta_key(&self, alias: &str) -> String {
        format!("{}{}", self.meta_root(), alias)
    }

    /// Read one route straight from the store.
    pub async fn fetch_route(&self, spec: &str) -> PersistenceResult<Option<RouteRecord>> {
        let routespec = decode(spec);
        let key = self.meta_key(&to_alias(&routespec, &self.designator));

        let fetch = async {
            match self.client.get(&key).await? {
                Some(value) => self.rebuild(&key, &value).map(Some),
                None => Ok(None),
            }
        };
        tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| PersistenceError::Timeout(self.timeout))?
    }

    /// Writes for one live route. `previous` is what the last commit stored.
    fn route_ops(
        &self,
        record: &RouteRecord,
        previous: Option<&StoredRoute>,
    ) -> PersistenceResult<Vec<KvOp>> {
        let keys = &record.keys;
        let stored = StoredRoute {
            routespec: record.routespec.clone(),
            target: record.target.clone(),
            data: record.data.clone(),
            updated_at: record.updated_at,
            entrypoints: self.provider.entrypoints.len(),
        };

        let mut ops = vec![
            KvOp::Put {
                key: self.meta_key(&record.alias),
                value: serde_json::to_string(&stored)?,
            },
            KvOp::Put {
                key: keys.backend_url_path.clone(),
                value: record.target.clone(),
            },
        ];

        ops.push(match &self.provider.servers_transport {
            Some(transport) => KvOp::Put {
                key: keys.backend_weight_path.clone(),
                value: transport.clone(),
            },
            None => KvOp::Delete {
                key: keys.backend_weight_path.clone(),
            },
        });

        ops.push(KvOp::Put {
            key: keys.frontend_backend_path.clone(),
            value: keys.backend_alias.clone(),
        });
        ops.push(KvOp::Put {
            key: keys.frontend_rule_path.clone(),
            value: record.rule.clone(),
        });

        for (i, entrypoint) in self.provider.entrypoints.iter().enumerate() {
            ops.push(KvOp::Put {
                key: self.schema.entrypoint_path(&record.alias, i),
                value: entrypoint.clone(),
            });
        }
        let written_before = previous.map(|p| p.entrypoints).unwrap_or(0);
        for i in self.provider.entrypoints.len()..written_before {
            ops.push(KvOp::Delete {
                key: self.schema.entrypoint_path(&record.alias, i),
            });
        }

        Ok(ops)
    }

    /// Deletes for a route that left the table.
    fn removal_ops(&self, alias: &str) -> Vec<KvOp> {
        vec![
            KvOp::DeleteTree {
                prefix: self.schema.router_root(alias),
            },
            KvOp::DeleteTree {
                prefix: self.schema.service_root(alias),
            },
            KvOp::Delete {
                key: self.meta_key(alias),
            },
        ]
    }

    fn rebuild(&self, key: &str, value: &str) -> PersistenceResult<RouteRecord> {
        let stored: StoredRoute = serde_json::from_str(value).map_err(|e| PersistenceError::Parse {
            location: key.to_string(),
            source: Box::new(e),
        })?;

        RouteRecord::build(
            &stored.routespec,
            &stored.target,
            stored.data,
            stored.updated_at,
            &self.schema,
            &self.designator,
        )
        .map_err(|e| PersistenceError::Corrupt {
            location: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn stored_routes(&self) -> PersistenceResult<BTreeMap<String, String>> {
        let root = self.meta_root();
        let listed = self.client.list(&root).await?;

        Ok(listed
            .into_iter()
            .filter_map(|(key, value)| {
                let alias = key.strip_prefix(&root)?;
                (!alias.is_empty() && !alias.contains('/')).then(|| (alias.to_string(), value))
            })
            .collect())
    }

    async fn commit_inner(&self, table: &RoutingTable) -> PersistenceResult<()> {
        let stored = self.stored_routes().await?;
        let previous: BTreeMap<&str, StoredRoute> = stored
            .iter()
            .filter_map(|(alias, value)| {
                serde_json::from_str(value).ok().map(|route| (alias.as_str(), route))
            })
            .collect();

        let mut groups: Vec<Vec<KvOp>> = table
            .iter()
            .map(|record| self.route_ops(record, previous.get(record.alias.as_str())))
            .collect::<PersistenceResult<_>>()?;

        let live: BTreeSet<&str> = table.iter().map(|r| r.alias.as_str()).collect();
        let stale: Vec<&String> = stored.keys().filter(|a| !live.contains(a.as_str())).collect();
        for alias in &stale {
            groups.push(self.removal_ops(alias));
        }

        let batches = pack(groups, self.client.max_txn_ops());
        for batch in &batches {
            self.client.apply(batch).await?;
        }

        tracing::debug!(
            routes = table.len(),
            removed = stale.len(),
            transactions = batches.len(),
            "KV routes committed"
        );
        Ok(())
    }

    async fn load_inner(&self) -> PersistenceResult<RoutingTable> {
        let mut table = RoutingTable::new();
        for (alias, value) in self.stored_routes().await? {
            let key = self.meta_key(&alias);
            table.insert(self.rebuild(&key, &value)?);
        }
        Ok(table)
    }
}

#[async_trait]
impl Persistence for KvPersistence {
    fn mode(&self) -> StorageMode {
        StorageMode::Kv
    }

    fn schema(&self) -> &KeySchema {
        &self.schema
    }

    fn designator(&self) -> &str {
        &self.designator
    }

    async fn commit(&self, table: &RoutingTable) -> PersistenceResult<()> {
        tokio::time::timeout(self.timeout, self.commit_inner(table))
            .await
            .map_err(|_| PersistenceError::Timeout(self.timeout))?
    }

    async fn load(&self) -> PersistenceResult<RoutingTable> {
        tokio::time::timeout(self.timeout, self.load_inner())
            .await
            .map_err(|_| PersistenceError::Timeout(self.timeout))?
    }
}

/// Pack op groups into transactions of at most `max_ops`, never splitting a
/// group. A group larger than `max_ops` gets a transaction of its own.
fn pack(groups: Vec<Vec<KvOp>>, max_ops: usize) -> Vec<Vec<KvOp>> {
    let mut batches = Vec::new();
    let mut current: Vec<KvOp> = Vec::new();

    for group in groups {
        if !current.is_empty() && current.len() + group.len() > max_ops {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(group);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
