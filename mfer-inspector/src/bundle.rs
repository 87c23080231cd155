//! Bundle editing.
//!
//! Every edit is computed locally on a copy of the stored bundle and
//! then handed to the proxy as a full replay; the proxy owns the store
//! and the simulated state.

use mfer_rpc::error::UpstreamError;
use mfer_rpc::rpc::CLEAR_METHOD;
use mfer_rpc::types::{JsonRpcRequest, TransactionRequest};
use mfer_rpc::upstream::{UpstreamClient, TRACE_BUNDLE_METHOD};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::info;

/// Gas limit pre-filled into newly added transactions.
pub const DEFAULT_GAS: &str = "0x1333332";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("index {index} out of range for bundle of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("order must be a permutation of 0..{0}")]
    NotAPermutation(usize),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] serde_json::Error),
}

/// Template new transactions start from.
pub fn default_transaction() -> Map<String, Value> {
    let mut tx = Map::new();
    tx.insert("from".into(), json!(""));
    tx.insert("to".into(), json!(""));
    tx.insert("data".into(), json!(""));
    tx.insert("value".into(), json!(""));
    tx.insert("gas".into(), json!(DEFAULT_GAS));
    tx
}

fn merge(mut base: Map<String, Value>, fields: Map<String, Value>) -> Result<TransactionRequest, BundleError> {
    base.extend(fields);
    Ok(serde_json::from_value(Value::Object(base))?)
}

fn check_index(bundle: &[TransactionRequest], index: usize) -> Result<(), BundleError> {
    if index < bundle.len() {
        Ok(())
    } else {
        Err(BundleError::IndexOutOfRange {
            index,
            len: bundle.len(),
        })
    }
}

/// Append `fields` laid over the default template.
pub fn add(bundle: &[TransactionRequest], fields: Map<String, Value>) -> Result<Vec<TransactionRequest>, BundleError> {
    let mut next = bundle.to_vec();
    next.push(merge(default_transaction(), fields)?);
    Ok(next)
}

/// Overwrite the given fields of the transaction at `index`.
pub fn edit(
    bundle: &[TransactionRequest],
    index: usize,
    fields: Map<String, Value>,
) -> Result<Vec<TransactionRequest>, BundleError> {
    check_index(bundle, index)?;
    let current = match serde_json::to_value(&bundle[index])? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let mut next = bundle.to_vec();
    next[index] = merge(current, fields)?;
    Ok(next)
}

pub fn delete(bundle: &[TransactionRequest], index: usize) -> Result<Vec<TransactionRequest>, BundleError> {
    check_index(bundle, index)?;
    let mut next = bundle.to_vec();
    next.remove(index);
    Ok(next)
}

/// Rearrange so that position `i` holds the old entry `order[i]`.
pub fn reorder(bundle: &[TransactionRequest], order: &[usize]) -> Result<Vec<TransactionRequest>, BundleError> {
    let mut seen = vec![false; bundle.len()];
    if order.len() != bundle.len() {
        return Err(BundleError::NotAPermutation(bundle.len()));
    }
    for &i in order {
        match seen.get_mut(i) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(BundleError::NotAPermutation(bundle.len())),
        }
    }
    Ok(order.iter().map(|&i| bundle[i].clone()).collect())
}

// ── Proxy client ────────────────────────────────────────────────

/// Talks to the proxy's direct dispatcher endpoint.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    url: String,
    upstream: UpstreamClient,
}

impl ProxyClient {
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            upstream: UpstreamClient::new(http),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Make `bundle` the pending bundle and replay it. Returns the hash
    /// of the last simulated transaction.
    pub async fn replay(&self, bundle: &[TransactionRequest]) -> Result<Option<String>, UpstreamError> {
        info!(tx_count = bundle.len(), "Replaying bundle through proxy");
        let req = JsonRpcRequest::new(0, TRACE_BUNDLE_METHOD, vec![serde_json::to_value(bundle)?]);
        let result = self.send(&req).await?;
        Ok(result.as_str().map(str::to_owned))
    }

    pub async fn clear(&self) -> Result<(), UpstreamError> {
        self.send(&JsonRpcRequest::new(0, CLEAR_METHOD, vec![]))
            .await
            .map(|_| ())
    }

    async fn send(&self, req: &JsonRpcRequest) -> Result<Value, UpstreamError> {
        let resp = self.upstream.call(&self.url, req).await?;
        match resp.error {
            Some(err) => Err(UpstreamError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(resp.result.unwrap_or(Value::Null)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
