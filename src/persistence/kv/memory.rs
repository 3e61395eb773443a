//! In-process KV store.
//!
//! Backs the `memory` backend and the tests. Operations of one `apply` are
//! run in order without isolation. Availability and latency can be switched
//! at runtime to simulate a failing cluster.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{KvClient, KvOp};
use crate::persistence::{PersistenceError, PersistenceResult};

#[derive(Debug)]
pub struct MemoryKv {
    data: DashMap<String, String>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    max_txn_ops: usize,
    transactions: AtomicUsize,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            max_txn_ops: 128,
            transactions: AtomicUsize::new(0),
        }
    }

    pub fn with_max_txn_ops(mut self, max: usize) -> Self {
        self.max_txn_ops = max.max(1);
        self
    }

    /// While unavailable every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay added before every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of successful `apply` calls.
    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    async fn enter(&self) -> PersistenceResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        self.enter().await?;
        Ok(self.data.get(key).map(|v| v.value().clone()))
    }

    async fn list(&self, prefix: &str) -> PersistenceResult<BTreeMap<String, String>> {
        self.enter().await?;
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn apply(&self, ops: &[KvOp]) -> PersistenceResult<()> {
        self.enter().await?;
        if ops.len() > self.max_txn_ops {
            return Err(PersistenceError::Rejected(format!(
                "transaction of {} ops exceeds limit {}",
                ops.len(),
                self.max_txn_ops
            )));
        }

        for op in ops {
            match op {
                KvOp::Put { key, value } => {
                    self.data.insert(key.clone(), value.clone());
                }
                KvOp::Delete { key } => {
                    self.data.remove(key);
                }
                KvOp::DeleteTree { prefix } => {
                    self.data.retain(|k, _| !k.starts_with(prefix.as_str()));
                }
            }
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn max_txn_ops(&self) -> usize {
        self.max_txn_ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: &str) -> KvOp {
        KvOp::Put {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[tokio::test]
    async fn test_apply_in_order() {
        let kv = MemoryKv::new();
        kv.apply(&[
            put("a/1", "x"),
            put("a/2", "y"),
            put("b/1", "z"),
            KvOp::DeleteTree { prefix: "a/".into() },
            put("a/3", "w"),
        ])
        .await
        .unwrap();

        let listed = kv.list("a/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed.get("a/3").map(String::as_str), Some("w"));
        assert_eq!(kv.get("b/1").await.unwrap().as_deref(), Some("z"));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let kv = MemoryKv::new();
        kv.set_available(false);

        assert!(matches!(
            kv.apply(&[put("a", "b")]).await,
            Err(PersistenceError::Unavailable(_))
        ));
        assert!(kv.is_empty());

        kv.set_available(true);
        kv.apply(&[put("a", "b")]).await.unwrap();
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_transaction_rejected() {
        let kv = MemoryKv::new().with_max_txn_ops(1);
        let err = kv.apply(&[put("a", "1"), put("b", "2")]).await.unwrap_err();

        assert!(matches!(err, PersistenceError::Rejected(_)));
        assert!(kv.is_empty());
        assert_eq!(kv.transactions(), 0);
    }
}
