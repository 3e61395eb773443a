//! Consul KV client over the HTTP API.
//!
//! Reads use `/v1/kv`, writes go through `/v1/txn` so the operations of one
//! batch are applied atomically.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::http::{base_url, build_client, check_status, transport_error};
use super::{KvClient, KvOp};
use crate::persistence::{PersistenceError, PersistenceResult};

/// Consul caps a transaction at 64 operations.
const MAX_TXN_OPS: usize = 64;

pub struct ConsulKv {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

#[derive(Debug, Serialize)]
struct TxnOp<'a> {
    #[serde(rename = "KV")]
    kv: TxnKv<'a>,
}

#[derive(Debug, Serialize)]
struct TxnKv<'a> {
    #[serde(rename = "Verb")]
    verb: &'static str,
    #[serde(rename = "Key")]
    key: &'a str,
    #[serde(rename = "Value", skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl<'a> From<&'a KvOp> for TxnOp<'a> {
    fn from(op: &'a KvOp) -> Self {
        let kv = match op {
            KvOp::Put { key, value } => TxnKv {
                verb: "set",
                key,
                value: Some(STANDARD.encode(value)),
            },
            KvOp::Delete { key } => TxnKv {
                verb: "delete",
                key,
                value: None,
            },
            KvOp::DeleteTree { prefix } => TxnKv {
                verb: "delete-tree",
                key: prefix,
                value: None,
            },
        };
        TxnOp { kv }
    }
}

impl ConsulKv {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> PersistenceResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: base_url(endpoint)?,
            token,
            timeout,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }

    fn decode_value(key: &str, value: Option<String>) -> PersistenceResult<String> {
        let Some(encoded) = value else {
            return Ok(String::new());
        };
        let bytes = STANDARD.decode(encoded).map_err(|e| PersistenceError::Parse {
            location: key.to_string(),
            source: Box::new(e),
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl KvClient for ConsulKv {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/kv/{key}"))
            .query(&[("raw", "true")])
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        Ok(Some(body))
    }

    async fn list(&self, prefix: &str) -> PersistenceResult<BTreeMap<String, String>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/kv/{prefix}"))
            .query(&[("recurse", "true")])
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(BTreeMap::new());
        }

        let entries: Vec<KvEntry> = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::Parse {
                location: format!("consul:{prefix}"),
                source: Box::new(e),
            })?;

        entries
            .into_iter()
            .map(|entry| {
                let value = Self::decode_value(&entry.key, entry.value)?;
                Ok((entry.key, value))
            })
            .collect()
    }

    async fn apply(&self, ops: &[KvOp]) -> PersistenceResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let body: Vec<TxnOp<'_>> = ops.iter().map(TxnOp::from).collect();

        let response = self
            .request(reqwest::Method::PUT, "/v1/txn")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        check_status(response).await?;

        tracing::trace!(ops = ops.len(), "Consul transaction applied");
        Ok(())
    }

    fn max_txn_ops(&self) -> usize {
        MAX_TXN_OPS
    }
}
