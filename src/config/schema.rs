//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::routing::keys::{normalize_prefix, LeadingSeparator};
use crate::routing::{KeySchema, Separator};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Which backing store holds the routing table.
    pub storage: StorageConfig,

    /// Flat-file backend settings.
    pub file: FileConfig,

    /// KV backend settings.
    pub kv: KvConfig,

    /// Options copied into every generated router/service.
    pub provider: ProviderConfig,

    pub observability: ObservabilityConfig,
}

impl StoreConfig {
    /// Normalize KV prefixes and empty optional strings in place. Idempotent.
    pub fn normalize(&mut self) {
        self.provider.servers_transport = non_empty(self.provider.servers_transport.take());
        self.kv.token = non_empty(self.kv.token.take());

        let leading = match self.kv.backend {
            KvBackendKind::Consul => LeadingSeparator::Strip,
            KvBackendKind::Etcd | KvBackendKind::Memory => LeadingSeparator::Keep,
        };
        self.kv.prefix = normalize_prefix(&self.kv.prefix, leading);
        self.kv.meta_prefix = normalize_prefix(&self.kv.meta_prefix, leading);
    }

    /// Key schema of the configured storage mode.
    pub fn key_schema(&self) -> KeySchema {
        match self.storage.mode {
            StorageMode::File => KeySchema::flat_file(),
            StorageMode::Kv => KeySchema::kv(self.kv.prefix.clone()),
        }
    }

    /// Separator the configured mode requires.
    pub fn expected_separator(&self) -> Separator {
        match self.storage.mode {
            StorageMode::File => Separator::Dot,
            StorageMode::Kv => Separator::Slash,
        }
    }
}

/// An empty string in the config file means "not set".
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Persistence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    #[default]
    File,
    Kv,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::File => "file",
            StorageMode::Kv => "kv",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,

    /// Optional; must match the mode when given.
    pub separator: Option<Separator>,

    /// Prepended to every alias. Lets several hubs share one proxy.
    pub designator: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    /// Dynamic configuration file watched by the proxy.
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rules.toml"),
        }
    }
}

/// KV implementation behind `mode = "kv"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KvBackendKind {
    #[default]
    Etcd,
    Consul,
    /// In-process store, lost on exit.
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KvConfig {
    pub backend: KvBackendKind,

    /// Base URL of the KV HTTP API.
    pub endpoint: String,

    /// Root of the keys the proxy watches.
    pub prefix: String,

    /// Root of the route records kept next to the proxy keys.
    pub meta_prefix: String,

    /// Upper bound for one commit or load, in milliseconds.
    pub timeout_ms: u64,

    /// Consul ACL token.
    pub token: Option<String>,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackendKind::Etcd,
            endpoint: "http://127.0.0.1:2379".to_string(),
            prefix: "traefik".to_string(),
            meta_prefix: "routekv".to_string(),
            timeout_ms: 5000,
            token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Entry points every router is bound to. Empty means all.
    pub entrypoints: Vec<String>,

    /// `serversTransport` referenced by every service.
    pub servers_transport: Option<String>,

    /// Address of the proxy's public entry point in the static config.
    pub entrypoint_address: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            entrypoints: Vec::new(),
            servers_transport: None,
            entrypoint_address: ":8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}
