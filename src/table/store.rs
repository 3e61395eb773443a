//! Serialized owner of the routing table.
//!
//! # Responsibilities
//! - Single mutation path: lock → copy → mutate → commit → publish
//! - Lock-free reads of the last committed snapshot
//!
//! # Design Decisions
//! - The in-memory table changes only after the backing store accepted the
//!   new snapshot; a failed commit leaves both untouched
//! - Re-adding identical content keeps the old timestamp so the persisted
//!   artifact does not change

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use crate::observability::metrics;
use crate::persistence::Persistence;
use crate::routing::{decode, RouteKeys};
use crate::table::{unix_now, RouteRecord, RoutingTable, TableResult};

/// Owns the routing table and its backing store.
pub struct TableStore {
    /// Serializes mutations and commits.
    writer: Mutex<()>,
    /// Last committed table.
    snapshot: ArcSwap<RoutingTable>,
    backend: Arc<dyn Persistence>,
}

impl TableStore {
    /// Open a store, reloading the table from the backing store.
    pub async fn open(backend: Arc<dyn Persistence>) -> TableResult<Self> {
        let table = backend.load().await?;

        tracing::info!(
            mode = %backend.mode(),
            routes = table.len(),
            "Routing table loaded"
        );
        metrics::record_route_count(table.len());

        Ok(Self::with_table(backend, table))
    }

    /// Start from an empty table without reading the backing store.
    pub fn empty(backend: Arc<dyn Persistence>) -> Self {
        Self::with_table(backend, RoutingTable::new())
    }

    fn with_table(backend: Arc<dyn Persistence>, table: RoutingTable) -> Self {
        Self {
            writer: Mutex::new(()),
            snapshot: ArcSwap::from_pointee(table),
            backend,
        }
    }

    /// Add or replace a route and commit the whole table.
    ///
    /// Returns the keys the route was written under.
    pub async fn add_route(
        &self,
        spec: &str,
        target: &str,
        data: serde_json::Value,
    ) -> TableResult<RouteKeys> {
        let routespec = decode(spec);
        let mut record = RouteRecord::build(
            &routespec,
            target,
            data,
            unix_now(),
            self.backend.schema(),
            self.backend.designator(),
        )?;
        let keys = record.keys.clone();

        let _guard = self.writer.lock().await;
        let current = self.snapshot.load_full();

        if let Some(existing) = current.get(&routespec) {
            if existing.same_content(&record) {
                record.updated_at = existing.updated_at;
            }
        }

        let mut next = (*current).clone();
        let replaced = next.insert(record).is_some();
        self.commit(next).await?;

        metrics::record_mutation("add");
        tracing::info!(
            routespec = %routespec,
            alias = %keys.backend_alias,
            target = %target,
            replaced,
            "Route added"
        );
        Ok(keys)
    }

    /// Remove a route. Returns `false` if it was not present.
    pub async fn remove_route(&self, spec: &str) -> TableResult<bool> {
        let routespec = decode(spec);

        let _guard = self.writer.lock().await;
        let current = self.snapshot.load_full();

        if current.get(&routespec).is_none() {
            tracing::debug!(routespec = %routespec, "Route not present, nothing to remove");
            return Ok(false);
        }

        let mut next = (*current).clone();
        next.remove(&routespec);
        self.commit(next).await?;

        metrics::record_mutation("remove");
        tracing::info!(routespec = %routespec, "Route removed");
        Ok(true)
    }

    /// Look up a route by spec (encoded or canonical).
    pub fn get_route(&self, spec: &str) -> Option<RouteRecord> {
        self.snapshot.load().get(&decode(spec)).cloned()
    }

    /// All routes in canonical spec order.
    pub fn list_routes(&self) -> Vec<RouteRecord> {
        self.snapshot.load().iter().cloned().collect()
    }

    /// The last committed table.
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.snapshot.load_full()
    }

    pub fn backend(&self) -> &Arc<dyn Persistence> {
        &self.backend
    }

    /// Must be called with the writer lock held.
    async fn commit(&self, next: RoutingTable) -> TableResult<()> {
        let mode = self.backend.mode();
        let start = Instant::now();

        if let Err(e) = self.backend.commit(&next).await {
            metrics::record_commit(mode, false, start);
            tracing::error!(
                mode = %mode,
                error = %e,
                "Commit failed, keeping previous routing table"
            );
            return Err(e.into());
        }

        metrics::record_commit(mode, true, start);
        metrics::record_route_count(next.len());
        tracing::debug!(
            mode = %mode,
            routes = next.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Routing table committed"
        );

        self.snapshot.store(Arc::new(next));
        Ok(())
    }
}
