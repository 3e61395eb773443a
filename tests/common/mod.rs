//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use routekv::config::{KvBackendKind, StorageMode, StoreConfig};

/// State of the fake Consul agent.
#[derive(Default)]
pub struct ConsulState {
    pub data: Mutex<BTreeMap<String, String>>,
    /// Size of every transaction received.
    pub txn_sizes: Mutex<Vec<usize>>,
    /// Answer every request with 500 while set.
    pub failing: AtomicBool,
}

impl ConsulState {
    pub fn keys(&self) -> Vec<String> {
        self.data.lock().unwrap().keys().cloned().collect()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

/// Start an in-process server speaking the subset of the Consul HTTP API
/// used by the KV client. Returns its base URL.
pub async fn start_fake_consul() -> (String, Arc<ConsulState>) {
    let state = Arc::new(ConsulState::default());
    let app = Router::new()
        .route("/v1/kv/{*key}", get(kv_get))
        .route("/v1/txn", put(txn))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

async fn kv_get(
    State(state): State<Arc<ConsulState>>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "agent down").into_response();
    }
    let data = state.data.lock().unwrap();

    if params.contains_key("recurse") {
        let entries: Vec<Value> = data
            .iter()
            .filter(|(k, _)| k.starts_with(&key))
            .map(|(k, v)| json!({ "Key": k, "Value": STANDARD.encode(v) }))
            .collect();
        if entries.is_empty() {
            return StatusCode::NOT_FOUND.into_response();
        }
        return Json(entries).into_response();
    }

    match data.get(&key) {
        Some(value) if params.contains_key("raw") => value.clone().into_response(),
        Some(value) => Json(json!([{ "Key": key, "Value": STANDARD.encode(value) }])).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn txn(State(state): State<Arc<ConsulState>>, Json(ops): Json<Vec<Value>>) -> Response {
    if state.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "agent down").into_response();
    }
    if ops.len() > 64 {
        return (StatusCode::PAYLOAD_TOO_LARGE, "too many operations").into_response();
    }
    state.txn_sizes.lock().unwrap().push(ops.len());

    // Stage on a copy so a bad op rolls the whole transaction back
    let mut data = state.data.lock().unwrap();
    let mut staged = data.clone();
    for op in &ops {
        let kv = &op["KV"];
        let key = kv["Key"].as_str().unwrap_or_default().to_string();
        match kv["Verb"].as_str() {
            Some("set") => {
                let raw = STANDARD.decode(kv["Value"].as_str().unwrap_or_default()).unwrap();
                staged.insert(key, String::from_utf8(raw).unwrap());
            }
            Some("delete") => {
                staged.remove(&key);
            }
            Some("delete-tree") => staged.retain(|k, _| !k.starts_with(&key)),
            _ => return (StatusCode::CONFLICT, "unknown verb").into_response(),
        }
    }
    *data = staged;

    Json(json!({ "Results": [], "Errors": null })).into_response()
}

/// Config for the flat-file backend writing into `dir`.
pub fn file_config(dir: &std::path::Path) -> StoreConfig {
    let mut config = StoreConfig::default();
    config.file.path = dir.join("rules.toml");
    config.normalize();
    config
}

/// Config for the Consul backend at `endpoint`.
pub fn consul_config(endpoint: &str) -> StoreConfig {
    let mut config = StoreConfig::default();
    config.storage.mode = StorageMode::Kv;
    config.kv.backend = KvBackendKind::Consul;
    config.kv.endpoint = endpoint.to_string();
    config.kv.timeout_ms = 2000;
    config.normalize();
    config
}

/// Files in `dir` left behind by interrupted atomic writes.
pub fn temp_files(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains("-tmp-"))
        .collect()
}
