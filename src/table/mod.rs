//! In-memory routing table.
//!
//! # Data Flow
//! ```text
//! add_route(spec, target, data)
//!     → routing::decode (canonical spec)
//!     → RouteRecord::build (rule + keys)
//!     → store.rs: copy table, apply mutation
//!     → persistence: commit full snapshot
//!     → on success: install copy, publish snapshot to readers
//! ```
//!
//! # Design Decisions
//! - Keys of the table are canonical specs, never the encoded form
//! - BTreeMap keeps listings and serialized output in a stable order
//! - A mutation becomes visible only after its commit succeeded

pub mod store;

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::routing::{compile_rule, generate_route_keys, KeySchema, MalformedRouteSpec, RouteKeys};

pub use store::TableStore;

/// Errors returned by table mutations.
#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    MalformedRouteSpec(#[from] MalformedRouteSpec),

    #[error("Invalid target URL '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Result type for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// One route of the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteRecord {
    /// Canonical (decoded) route spec.
    pub routespec: String,
    /// Shared router/service name.
    pub alias: String,
    /// Backend URL, exactly as supplied.
    pub target: String,
    /// Caller metadata, opaque to the store.
    pub data: serde_json::Value,
    pub rule: String,
    pub keys: RouteKeys,
    /// Last change of target or data (seconds since epoch).
    pub updated_at: u64,
}

impl RouteRecord {
    /// Build a record for a canonical spec, compiling its rule and keys.
    pub fn build(
        routespec: &str,
        target: &str,
        data: serde_json::Value,
        updated_at: u64,
        schema: &KeySchema,
        designator: &str,
    ) -> TableResult<Self> {
        let rule = compile_rule(routespec)?;
        url::Url::parse(target).map_err(|source| TableError::InvalidTarget {
            target: target.to_string(),
            source,
        })?;
        let keys = generate_route_keys(routespec, designator, schema);

        Ok(Self {
            routespec: routespec.to_string(),
            alias: keys.backend_alias.clone(),
            target: target.to_string(),
            data,
            rule,
            keys,
            updated_at,
        })
    }

    /// Whether `other` carries the same target and metadata.
    pub fn same_content(&self, other: &RouteRecord) -> bool {
        self.target == other.target && self.data == other.data
    }
}

/// Canonical spec → record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingTable {
    routes: BTreeMap<String, RouteRecord>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for its spec.
    pub fn insert(&mut self, record: RouteRecord) -> Option<RouteRecord> {
        self.routes.insert(record.routespec.clone(), record)
    }

    pub fn remove(&mut self, routespec: &str) -> Option<RouteRecord> {
        self.routes.remove(routespec)
    }

    pub fn get(&self, routespec: &str) -> Option<&RouteRecord> {
        self.routes.get(routespec)
    }

    /// Records in canonical spec order.
    pub fn iter(&self) -> impl Iterator<Item = &RouteRecord> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<RouteRecord> for RoutingTable {
    fn from_iter<I: IntoIterator<Item = RouteRecord>>(iter: I) -> Self {
        let mut table = Self::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}

/// Current time in seconds since the epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(spec: &str, target: &str) -> RouteRecord {
        RouteRecord::build(spec, target, json!({}), 1, &KeySchema::flat_file(), "").unwrap()
    }

    #[test]
    fn test_build_record() {
        let rec = RouteRecord::build(
            "host.tld/a/",
            "http://10.0.0.1:8888",
            json!({"user": "alice"}),
            42,
            &KeySchema::kv("traefik/"),
            "",
        )
        .unwrap();

        assert_eq!(rec.alias, "host_2etld-a-");
        assert_eq!(rec.rule, "Host(`host.tld`) && PathPrefix(`/a/`)");
        assert_eq!(rec.target, "http://10.0.0.1:8888");
        assert_eq!(rec.keys.frontend_rule_path, "traefik/http/routers/host_2etld-a-/rule");
        assert_eq!(rec.updated_at, 42);
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let schema = KeySchema::flat_file();
        let err = RouteRecord::build("nohost", "http://a:1", json!(null), 0, &schema, "").unwrap_err();
        assert!(matches!(err, TableError::MalformedRouteSpec(_)));

        let err = RouteRecord::build("/a/", "not a url", json!(null), 0, &schema, "").unwrap_err();
        assert!(matches!(err, TableError::InvalidTarget { .. }));
    }

    #[test]
    fn test_table_is_ordered_and_unique() {
        let mut table = RoutingTable::new();
        table.insert(record("/b/", "http://b:1"));
        table.insert(record("/a/", "http://a:1"));
        table.insert(record("/b/", "http://b:2"));

        let specs: Vec<_> = table.iter().map(|r| r.routespec.as_str()).collect();
        assert_eq!(specs, vec!["/a/", "/b/"]);
        assert_eq!(table.get("/b/").unwrap().target, "http://b:2");

        assert!(table.remove("/a/").is_some());
        assert!(table.remove("/a/").is_none());
        assert_eq!(table.len(), 1);
    }
}
