//! The injected wallet provider.
//!
//! Exposes the request surface dApps expect from an injected wallet and
//! forwards everything over the bridge. The chain id is fetched once at
//! connect time and served from cache afterwards.

use crate::bridge::PageBridge;
use crate::error::ProviderError;
use crate::types::{JsonRpcPayload, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// EIP-1193 request arguments.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default)]
    pub params: Option<Vec<Value>>,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Payload accepted by `send_async`: one request or a batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SendAsyncPayload {
    Batch(Vec<JsonRpcPayload>),
    Single(JsonRpcPayload),
}

/// What a `send_async` callback receives on success.
#[derive(Debug, Clone, PartialEq)]
pub enum SendAsyncResult {
    Single(JsonRpcResponse),
    Batch(Vec<JsonRpcResponse>),
}

pub type Callback = Box<dyn FnOnce(Result<SendAsyncResult, ProviderError>) + Send>;

/// Legacy `send` call shapes.
pub enum LegacySend {
    /// `send(method, params)`
    Method { method: String, params: Vec<Value> },
    /// `send(payload, callback)`
    WithCallback(JsonRpcPayload, Callback),
    /// `send(payload)`
    Payload(JsonRpcPayload),
}

pub struct Provider {
    bridge: Arc<PageBridge>,
    next_id: AtomicU64,
    chain_id: OnceLock<String>,
    net_version: OnceLock<String>,
    pub is_meta_mask: bool,
}

impl Provider {
    /// Create the provider and prime the chain id cache. A failed
    /// lookup is logged and leaves the cache empty.
    pub async fn connect(bridge: Arc<PageBridge>) -> Self {
        let provider = Self {
            bridge,
            next_id: AtomicU64::new(1),
            chain_id: OnceLock::new(),
            net_version: OnceLock::new(),
            is_meta_mask: true,
        };
        provider.init().await;
        provider
    }

    async fn init(&self) {
        match self.do_send("eth_chainId", Vec::new()).await {
            Ok(Value::String(chain_id)) => {
                let hex = chain_id.trim_start_matches("0x");
                match u64::from_str_radix(hex, 16) {
                    Ok(n) => {
                        let _ = self.net_version.set(n.to_string());
                    }
                    Err(e) => warn!(chain_id = %chain_id, error = %e, "Chain id is not hex"),
                }
                let _ = self.chain_id.set(chain_id);
            }
            Ok(other) => warn!(result = %other, "Unexpected eth_chainId result"),
            Err(e) => warn!(error = %e, "Failed to fetch chain id"),
        }
    }

    pub fn chain_id(&self) -> Option<&str> {
        self.chain_id.get().map(String::as_str)
    }

    pub fn network_version(&self) -> Option<&str> {
        self.net_version.get().map(String::as_str)
    }

    /// Accounts are never pushed to the provider; callers ask for them.
    pub fn selected_address(&self) -> Option<&str> {
        None
    }

    pub fn is_connected(&self) -> bool {
        true
    }

    pub async fn request(&self, args: RequestArguments) -> Result<Value, ProviderError> {
        match args.method.as_str() {
            "net_version" => {
                if let Some(v) = self.network_version() {
                    return Ok(Value::String(v.to_string()));
                }
            }
            "eth_chainId" => {
                if let Some(v) = self.chain_id() {
                    return Ok(Value::String(v.to_string()));
                }
            }
            _ => {}
        }
        self.do_send(&args.method, args.params.unwrap_or_default()).await
    }

    async fn do_send(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .bridge
            .send(JsonRpcRequest::new(id, method, params))
            .await?;
        if let Some(err) = response.error {
            debug!(method, code = err.code, "Request rejected");
            return Err(ProviderError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn send(&self, call: LegacySend) -> Result<Value, ProviderError> {
        match call {
            LegacySend::Method { method, params } => self.do_send(&method, params).await,
            LegacySend::WithCallback(payload, cb) => {
                match self
                    .send_async(Some(SendAsyncPayload::Single(payload)), Some(cb))
                    .await
                {
                    Some(err) => Err(err),
                    None => Ok(Value::Null),
                }
            }
            LegacySend::Payload(payload) => {
                self.request(RequestArguments {
                    method: payload.method,
                    params: Some(payload.params),
                })
                .await
            }
        }
    }

    /// Callback-style send. A missing callback is returned as an error
    /// value; every other outcome is delivered through the callback.
    pub async fn send_async(
        &self,
        raw: Option<SendAsyncPayload>,
        cb: Option<Callback>,
    ) -> Option<ProviderError> {
        let Some(cb) = cb else {
            return Some(ProviderError::InvalidCallback);
        };
        let Some(raw) = raw else {
            cb(Err(ProviderError::InvalidPayload));
            return None;
        };

        match raw {
            SendAsyncPayload::Batch(payloads) => {
                let mut responses = Vec::with_capacity(payloads.len());
                for payload in payloads {
                    match self.do_send(&payload.method, payload.params).await {
                        Ok(result) => responses.push(JsonRpcResponse::success(payload.id, result)),
                        Err(e) => {
                            cb(Err(e));
                            return None;
                        }
                    }
                }
                cb(Ok(SendAsyncResult::Batch(responses)));
            }
            SendAsyncPayload::Single(payload) => {
                let result = self.do_send(&payload.method, payload.params).await;
                cb(result.map(|r| SendAsyncResult::Single(JsonRpcResponse::success(payload.id, r))));
            }
        }
        None
    }

    pub async fn enable(&self) -> Result<Value, ProviderError> {
        self.request(RequestArguments::new("eth_requestAccounts", Vec::new()))
            .await
    }

    // Event subscription is accepted for interface compatibility only.

    pub fn on(&self, _event: &str) -> &Self {
        self
    }

    pub fn once(&self, _event: &str) -> &Self {
        self
    }

    pub fn off(&self, _event: &str) -> &Self {
        self
    }

    pub fn add_listener(&self, _event: &str) -> &Self {
        self
    }

    pub fn remove_listener(&self, _event: &str) -> &Self {
        self
    }

    pub fn remove_all_listeners(&self) -> &Self {
        self
    }
}

/// Response envelope for a caller-supplied payload.
pub fn payload_response(payload: &JsonRpcPayload, result: Result<Value, ProviderError>) -> JsonRpcResponse {
    let mut response = match result {
        Ok(result) => JsonRpcResponse::success(payload.id.clone(), result),
        Err(ProviderError::Rpc { code, message }) => JsonRpcResponse::error(payload.id.clone(), code, message),
        Err(e) => JsonRpcResponse::error(payload.id.clone(), crate::types::INTERNAL_ERROR, e.to_string()),
    };
    response.jsonrpc = payload
        .jsonrpc
        .clone()
        .unwrap_or_else(|| JSONRPC_VERSION.to_string());
    response
}

// ── Tests ───────────────────────────────────────────────────────
