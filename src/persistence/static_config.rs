//! Static proxy configuration.
//!
//! Tells the proxy where its public entry point listens and which provider
//! to watch for the dynamic routes this crate writes. Written once at setup,
//! so a plain write is enough.

use std::io;
use std::path::Path;

use toml::{Table, Value};

use crate::config::{KvBackendKind, StorageMode, StoreConfig};

/// Entry point name used when none is configured.
const DEFAULT_ENTRYPOINT: &str = "web";

/// Render the static configuration for `config`.
pub fn render(config: &StoreConfig) -> Table {
    let mut root = Table::new();

    let entrypoint = config
        .provider
        .entrypoints
        .first()
        .map(String::as_str)
        .unwrap_or(DEFAULT_ENTRYPOINT);
    let mut address = Table::new();
    address.insert(
        "address".into(),
        Value::String(config.provider.entrypoint_address.clone()),
    );
    let mut entrypoints = Table::new();
    entrypoints.insert(entrypoint.to_string(), Value::Table(address));
    root.insert("entryPoints".into(), Value::Table(entrypoints));

    let mut providers = Table::new();
    match config.storage.mode {
        StorageMode::File => {
            let mut file = Table::new();
            file.insert(
                "filename".into(),
                Value::String(config.file.path.display().to_string()),
            );
            file.insert("watch".into(), Value::Boolean(true));
            providers.insert("file".into(), Value::Table(file));
        }
        StorageMode::Kv => {
            let name = match config.kv.backend {
                KvBackendKind::Etcd => Some("etcd"),
                KvBackendKind::Consul => Some("consul"),
                // Nothing outside this process can read it
                KvBackendKind::Memory => None,
            };
            if let Some(name) = name {
                let mut kv = Table::new();
                kv.insert(
                    "endpoints".into(),
                    Value::Array(vec![Value::String(endpoint_authority(&config.kv.endpoint))]),
                );
                kv.insert(
                    "rootKey".into(),
                    Value::String(config.kv.prefix.trim_end_matches('/').to_string()),
                );
                if let (KvBackendKind::Consul, Some(token)) = (config.kv.backend, &config.kv.token) {
                    kv.insert("token".into(), Value::String(token.clone()));
                }
                providers.insert(name.into(), Value::Table(kv));
            }
        }
    }
    root.insert("providers".into(), Value::Table(providers));

    root
}

/// `host:port` of an endpoint URL; the raw string if it does not parse.
fn endpoint_authority(endpoint: &str) -> String {
    match url::Url::parse(endpoint) {
        Ok(url) => match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => endpoint.to_string(),
        },
        Err(_) => endpoint.to_string(),
    }
}

/// Write the rendered static configuration to `path`.
pub fn persist_static_config(path: &Path, table: &Table) -> io::Result<()> {
    let text = toml::to_string(table).map_err(io::Error::other)?;
    std::fs::write(path, text)
}
