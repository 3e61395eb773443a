//! etcd v3 client over the JSON gateway.
//!
//! Keys and values travel base64 encoded. Prefix operations use the usual
//! `[prefix, prefix+1)` key range.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::http::{base_url, build_client, check_status, transport_error};
use super::{KvClient, KvOp};
use crate::persistence::{PersistenceError, PersistenceResult};

/// etcd's default `--max-txn-ops`.
const MAX_TXN_OPS: usize = 128;

pub struct EtcdKv {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Serialize)]
struct TxnRequest {
    success: Vec<RequestOp>,
}

#[derive(Debug, Serialize)]
enum RequestOp {
    #[serde(rename = "request_put")]
    Put { key: String, value: String },
    #[serde(rename = "request_delete_range")]
    DeleteRange {
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        range_end: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

/// First key after every key starting with `prefix`.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // All 0xff (or empty): range to the end of the keyspace
    vec![0]
}

fn b64(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

impl From<&KvOp> for RequestOp {
    fn from(op: &KvOp) -> Self {
        match op {
            KvOp::Put { key, value } => RequestOp::Put {
                key: b64(key),
                value: b64(value),
            },
            KvOp::Delete { key } => RequestOp::DeleteRange {
                key: b64(key),
                range_end: None,
            },
            KvOp::DeleteTree { prefix } => RequestOp::DeleteRange {
                key: b64(prefix),
                range_end: Some(b64(prefix_range_end(prefix.as_bytes()))),
            },
        }
    }
}

impl EtcdKv {
    pub fn new(endpoint: &str, timeout: Duration) -> PersistenceResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: base_url(endpoint)?,
            timeout,
        })
    }

    async fn range(&self, request: RangeRequest) -> PersistenceResult<Vec<(String, String)>> {
        let response = self
            .client
            .post(format!("{}/v3/kv/range", self.base))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let body: RangeResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::Parse {
                location: "etcd range".to_string(),
                source: Box::new(e),
            })?;

        body.kvs
            .into_iter()
            .map(|kv| Ok((decode(&kv.key)?, decode(&kv.value)?)))
            .collect()
    }
}

fn decode(field: &str) -> PersistenceResult<String> {
    let bytes = STANDARD.decode(field).map_err(|e| PersistenceError::Parse {
        location: "etcd key-value".to_string(),
        source: Box::new(e),
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl KvClient for EtcdKv {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let found = self
            .range(RangeRequest {
                key: b64(key),
                range_end: None,
            })
            .await?;
        Ok(found.into_iter().next().map(|(_, value)| value))
    }

    async fn list(&self, prefix: &str) -> PersistenceResult<BTreeMap<String, String>> {
        let found = self
            .range(RangeRequest {
                key: b64(prefix),
                range_end: Some(b64(prefix_range_end(prefix.as_bytes()))),
            })
            .await?;
        Ok(found.into_iter().collect())
    }

    async fn apply(&self, ops: &[KvOp]) -> PersistenceResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let request = TxnRequest {
            success: ops.iter().map(RequestOp::from).collect(),
        };

        let response = self
            .client
            .post(format!("{}/v3/kv/txn", self.base))
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let body: TxnResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| PersistenceError::Parse {
                location: "etcd txn".to_string(),
                source: Box::new(e),
            })?;

        // No compare clauses, so the success branch always runs
        if !body.succeeded {
            return Err(PersistenceError::Rejected("etcd transaction not applied".to_string()));
        }
        tracing::trace!(ops = ops.len(), "etcd transaction applied");
        Ok(())
    }

    fn max_txn_ops(&self) -> usize {
        MAX_TXN_OPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end(b"traefik/"), b"traefik0".to_vec());
        assert_eq!(prefix_range_end(b"a\xff"), b"b".to_vec());
        assert_eq!(prefix_range_end(b""), vec![0]);
        assert_eq!(prefix_range_end(b"\xff\xff"), vec![0]);
    }

    #[test]
    fn test_request_ops() {
        let put = serde_json::to_value(RequestOp::from(&KvOp::Put {
            key: "k".into(),
            value: "v".into(),
        }))
        .unwrap();
        assert_eq!(put["request_put"]["key"], b64("k"));
        assert_eq!(put["request_put"]["value"], b64("v"));

        let delete = serde_json::to_value(RequestOp::from(&KvOp::Delete { key: "k".into() })).unwrap();
        assert!(delete["request_delete_range"].get("range_end").is_none());

        let tree = serde_json::to_value(RequestOp::from(&KvOp::DeleteTree {
            prefix: "a/".into(),
        }))
        .unwrap();
        assert_eq!(tree["request_delete_range"]["range_end"], b64("a0"));
    }

    #[test]
    fn test_range_response_without_kvs() {
        let parsed: RangeResponse = serde_json::from_str(r#"{"header":{"revision":"3"}}"#).unwrap();
        assert!(parsed.kvs.is_empty());
    }
}
