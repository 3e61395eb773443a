//! Route table maintenance for a dynamically configured edge proxy.
//!
//! Routes are added and removed by spec (`/user/alice/` or
//! `host.tld/path`), compiled into proxy rules and router/service keys, and
//! committed either to a flat TOML file the proxy watches or to a
//! hierarchical KV store.

pub mod config;
pub mod observability;
pub mod persistence;
pub mod routing;
pub mod table;

pub use config::schema::StoreConfig;
pub use persistence::{connect, Persistence, PersistenceError};
pub use routing::{KeySchema, RouteKeys};
pub use table::{RouteRecord, RoutingTable, TableError, TableStore};
