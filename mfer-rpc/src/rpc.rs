//! JSON-RPC dispatcher: answers from simulated state, forwards to the
//! chain endpoint, or replays the bundle on the simulation backend.
//!
//! Reads for the impersonated account prefer the freshest simulated
//! state. Every write goes through a full replay of the bundle so
//! edits, deletions and reorders never need incremental patching.

use crate::config::ReplayPolicy;
use crate::error::StoreError;
use crate::obfuscator::AddressObfuscator;
use crate::settings::{Settings, SettingsStore};
use crate::state::{BundleStatus, SimulationState};
use crate::store::{Store, TRANSACTION_RECEIPTS_KEY, TX_BUNDLE_KEY};
use crate::types::{
    JsonRpcRequest, JsonRpcResponse, TransactionRequest, INTERNAL_ERROR, INVALID_PARAMS,
};
use crate::upstream::{UpstreamClient, TRACE_BUNDLE_METHOD};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Gas estimate handed out without asking any endpoint; the backend
/// accounts for real gas during replay.
pub const FIXED_GAS_ESTIMATE: &str = "0xffffff";

pub const CLEAR_METHOD: &str = "mfer_clear";
pub const BUNDLE_STATUS_METHOD: &str = "mfer_bundleStatus";

/// Methods the dispatcher treats specially. Anything else is forwarded
/// verbatim to the chain endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMethod {
    Clear,
    BundleStatus,
    Accounts,
    EstimateGas,
    Call,
    GetBalance,
    GetCode,
    SendTransaction,
    TraceTransactionBundle,
    GetTransactionByHash,
    GetTransactionReceipt,
    Other(String),
}

impl RpcMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            CLEAR_METHOD => RpcMethod::Clear,
            BUNDLE_STATUS_METHOD => RpcMethod::BundleStatus,
            "eth_accounts" | "eth_requestAccounts" => RpcMethod::Accounts,
            "eth_estimateGas" => RpcMethod::EstimateGas,
            "eth_call" => RpcMethod::Call,
            "eth_getBalance" => RpcMethod::GetBalance,
            "eth_getCode" => RpcMethod::GetCode,
            "eth_sendTransaction" => RpcMethod::SendTransaction,
            TRACE_BUNDLE_METHOD => RpcMethod::TraceTransactionBundle,
            "eth_getTransactionByHash" => RpcMethod::GetTransactionByHash,
            "eth_getTransactionReceipt" => RpcMethod::GetTransactionReceipt,
            other => RpcMethod::Other(other.to_string()),
        }
    }
}

pub struct Dispatcher {
    settings: Arc<SettingsStore>,
    store: Arc<Store>,
    obfuscator: AddressObfuscator,
    state: Mutex<SimulationState>,
    upstream: UpstreamClient,
    replay_policy: ReplayPolicy,
    replay_gate: tokio::sync::Mutex<()>,
    /// Last generation written per persisted key, so an older snapshot
    /// never overwrites a newer one.
    persisted: tokio::sync::Mutex<HashMap<&'static str, u64>>,
}

impl Dispatcher {
    /// Build the dispatcher, seeding simulation state from `store`.
    pub async fn init(
        settings: Arc<SettingsStore>,
        store: Arc<Store>,
        obfuscator: AddressObfuscator,
        upstream: UpstreamClient,
        replay_policy: ReplayPolicy,
    ) -> Self {
        let state = SimulationState::load(&store).await;
        Self {
            settings,
            store,
            obfuscator,
            state: Mutex::new(state),
            upstream,
            replay_policy,
            replay_gate: tokio::sync::Mutex::new(()),
            persisted: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn obfuscator(&self) -> &AddressObfuscator {
        &self.obfuscator
    }

    pub fn status(&self) -> BundleStatus {
        self.state().status()
    }

    pub fn tx_bundle(&self) -> Vec<TransactionRequest> {
        self.state().tx_bundle().to_vec()
    }

    fn state(&self) -> MutexGuard<'_, SimulationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handle one request. Every path produces exactly one response
    /// carrying the request's id.
    pub async fn handle_rpc(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        info!(method = %req.method, id = req.id, "RPC request received");
        let settings = self.settings.snapshot();

        match RpcMethod::parse(&req.method) {
            RpcMethod::Clear => self.clear(req.id).await,
            RpcMethod::BundleStatus => match serde_json::to_value(self.status()) {
                Ok(status) => JsonRpcResponse::success(req.id, status),
                Err(e) => JsonRpcResponse::error(req.id, INTERNAL_ERROR, e.to_string()),
            },
            RpcMethod::Accounts => JsonRpcResponse::success(
                req.id,
                json!([self.obfuscator.exposed_account(&settings)]),
            ),
            RpcMethod::EstimateGas => JsonRpcResponse::success(req.id, json!(FIXED_GAS_ESTIMATE)),
            RpcMethod::Call => self.eth_call(&settings, req).await,
            RpcMethod::GetBalance => {
                let req = self.reveal_request(&settings, req);
                let cached = self.state().balance_override(&settings.impersonated_account);
                match cached {
                    Some(balance) => {
                        debug!("Serving eth_getBalance from simulated state");
                        JsonRpcResponse::success(req.id, balance)
                    }
                    None => self.forward(&settings.eth_rpc, &req).await,
                }
            }
            RpcMethod::GetCode => {
                let req = self.reveal_request(&settings, req);
                let cached = self.state().code_override(&settings.impersonated_account);
                match cached {
                    Some(code) => {
                        debug!("Serving eth_getCode from simulated state");
                        JsonRpcResponse::success(req.id, Value::String(code))
                    }
                    None => self.forward(&settings.eth_rpc, &req).await,
                }
            }
            RpcMethod::SendTransaction => self.send_transaction(&settings, req).await,
            RpcMethod::TraceTransactionBundle => self.trace_bundle(&settings, req).await,
            RpcMethod::GetTransactionByHash => {
                let cached = first_str(&req.params)
                    .and_then(|hash| self.state().find_transaction(hash).cloned());
                match cached.map(serde_json::to_value) {
                    Some(Ok(tx)) => {
                        JsonRpcResponse::success(req.id, self.obfuscator.conceal(&settings, tx))
                    }
                    Some(Err(e)) => JsonRpcResponse::error(req.id, INTERNAL_ERROR, e.to_string()),
                    None => self.forward(&settings.eth_rpc, &req).await,
                }
            }
            RpcMethod::GetTransactionReceipt => {
                let cached = first_str(&req.params).and_then(|hash| self.state().find_receipt(hash));
                match cached.map(serde_json::to_value) {
                    Some(Ok(receipt)) => JsonRpcResponse::success(req.id, receipt),
                    Some(Err(e)) => JsonRpcResponse::error(req.id, INTERNAL_ERROR, e.to_string()),
                    None => self.forward(&settings.eth_rpc, &req).await,
                }
            }
            RpcMethod::Other(_) => self.forward(&settings.eth_rpc, &req).await,
        }
    }

    // ── Handlers ────────────────────────────────────────────────

    async fn clear(&self, id: u64) -> JsonRpcResponse {
        let (bundle_generation, trace_generation) = {
            let mut state = self.state();
            state.clear();
            (state.bundle_generation(), state.trace_generation())
        };
        info!("Simulation state cleared");

        let persisted = async {
            self.persist(TX_BUNDLE_KEY, bundle_generation, json!([])).await?;
            self.persist(TRANSACTION_RECEIPTS_KEY, trace_generation, json!([]))
                .await
        }
        .await;
        match persisted {
            Ok(()) => JsonRpcResponse::success(id, json!(true)),
            Err(e) => {
                warn!(error = %e, "Failed to persist cleared state");
                JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Store error: {e}"))
            }
        }
    }

    async fn eth_call(&self, settings: &Settings, mut req: JsonRpcRequest) -> JsonRpcResponse {
        if req.params.is_empty() {
            return JsonRpcResponse::error(req.id, INVALID_PARAMS, "eth_call expects a call object");
        }
        let overrides = serde_json::to_value(self.state().state_diff())
            .unwrap_or_else(|_| json!({}));

        // The override set is the third positional parameter.
        if req.params.len() == 1 {
            req.params.push(json!("latest"));
        }
        if req.params.len() < 3 {
            req.params.push(overrides);
        } else {
            req.params[2] = overrides;
        }
        let call = req.params[0].take();
        req.params[0] = self.obfuscator.reveal(settings, call);

        self.forward(&settings.eth_rpc, &req).await
    }

    async fn send_transaction(&self, settings: &Settings, req: JsonRpcRequest) -> JsonRpcResponse {
        let Some(tx) = req.params.first().cloned() else {
            return JsonRpcResponse::error(req.id, INVALID_PARAMS, "Invalid params: empty params");
        };
        let tx: TransactionRequest = match serde_json::from_value(self.obfuscator.reveal(settings, tx)) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(error = %e, "Failed to parse transaction");
                return JsonRpcResponse::error(req.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            }
        };

        let (previous, bundle, generation) = {
            let mut state = self.state();
            let previous = state.tx_bundle().to_vec();
            let generation = state.push_transaction(tx);
            (previous, state.tx_bundle().to_vec(), generation)
        };
        info!(tx_count = bundle.len(), "Transaction appended to bundle");
        self.persist_bundle(generation, &bundle).await;

        self.replay(settings, req.id, bundle, previous, generation).await
    }

    async fn trace_bundle(&self, settings: &Settings, req: JsonRpcRequest) -> JsonRpcResponse {
        let Some(bundle) = req.params.first().cloned() else {
            return JsonRpcResponse::error(req.id, INVALID_PARAMS, "Invalid params: missing bundle");
        };
        let bundle: Vec<TransactionRequest> = match serde_json::from_value(bundle) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!(error = %e, "Failed to parse bundle");
                return JsonRpcResponse::error(req.id, INVALID_PARAMS, format!("Invalid params: {e}"));
            }
        };

        let (previous, generation) = {
            let mut state = self.state();
            let previous = state.tx_bundle().to_vec();
            (previous, state.replace_bundle(bundle.clone()))
        };
        info!(tx_count = bundle.len(), "Bundle replaced");
        self.persist_bundle(generation, &bundle).await;

        self.replay(settings, req.id, bundle, previous, generation).await
    }

    /// Replay `bundle` on the backend and install the result. On failure
    /// the previous bundle is put back unless something replaced it in
    /// the meantime.
    async fn replay(
        &self,
        settings: &Settings,
        id: u64,
        bundle: Vec<TransactionRequest>,
        previous: Vec<TransactionRequest>,
        generation: u64,
    ) -> JsonRpcResponse {
        let _gate = match self.replay_policy {
            ReplayPolicy::Serialized => Some(self.replay_gate.lock().await),
            ReplayPolicy::LastWins => None,
        };

        let result = match self
            .upstream
            .trace_bundle(&settings.mfer_rpc, id, &bundle)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, tx_count = bundle.len(), "Bundle replay failed");
                let restored = {
                    let mut state = self.state();
                    if state.restore_bundle(generation, previous.clone()) {
                        Some(state.bundle_generation())
                    } else {
                        None
                    }
                };
                if let Some(generation) = restored {
                    self.persist_bundle(generation, &previous).await;
                }
                return JsonRpcResponse::error(id, INTERNAL_ERROR, format!("Simulation backend error: {e}"));
            }
        };

        let last_tx_hash = result.last_tx_hash.clone();
        let (receipts, trace_generation) = {
            let mut state = self.state();
            let trace_generation = state.apply_trace(result);
            (serde_json::to_value(state.transaction_receipts()), trace_generation)
        };
        info!(
            tx_count = bundle.len(),
            last_tx_hash = last_tx_hash.as_deref().unwrap_or("none"),
            "Bundle replayed"
        );

        match receipts {
            Ok(receipts) => {
                if let Err(e) = self
                    .persist(TRANSACTION_RECEIPTS_KEY, trace_generation, receipts)
                    .await
                {
                    warn!(error = %e, "Failed to persist receipts");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode receipts"),
        }

        JsonRpcResponse::success(id, last_tx_hash.map(Value::String).unwrap_or(Value::Null))
    }

    // ── Helpers ─────────────────────────────────────────────────

    /// Forward a request to `url` and relay whatever comes back.
    async fn forward(&self, url: &str, req: &JsonRpcRequest) -> JsonRpcResponse {
        match self.upstream.call(url, req).await {
            Ok(mut resp) => {
                if resp.result.is_none() && resp.error.is_none() {
                    resp.result = Some(Value::Null);
                }
                resp
            }
            Err(e) => {
                warn!(method = %req.method, error = %e, "Upstream call failed");
                JsonRpcResponse::error(req.id, INTERNAL_ERROR, e.to_string())
            }
        }
    }

    fn reveal_request(&self, settings: &Settings, req: JsonRpcRequest) -> JsonRpcRequest {
        let JsonRpcRequest {
            jsonrpc,
            id,
            method,
            params,
        } = req;
        let params = match self.obfuscator.reveal(settings, Value::Array(params)) {
            Value::Array(params) => params,
            other => vec![other],
        };
        JsonRpcRequest {
            jsonrpc,
            id,
            method,
            params,
        }
    }

    async fn persist_bundle(&self, generation: u64, bundle: &[TransactionRequest]) {
        let value = match serde_json::to_value(bundle) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to encode bundle");
                return;
            }
        };
        if let Err(e) = self.persist(TX_BUNDLE_KEY, generation, value).await {
            warn!(error = %e, "Failed to persist bundle");
        }
    }

    /// Write `value` under `key` unless a newer generation already made it to disk.
    async fn persist(&self, key: &'static str, generation: u64, value: Value) -> Result<(), StoreError> {
        let mut written = self.persisted.lock().await;
        if written.get(key).is_some_and(|last| *last >= generation) {
            debug!(key, generation, "Skipping stale persist");
            return Ok(());
        }
        self.store.set_one(key, value).await?;
        written.insert(key, generation);
        Ok(())
    }
}

fn first_str(params: &[Value]) -> Option<&str> {
    params.first().and_then(Value::as_str)
}

// ── Tests ───────────────────────────────────────────────────────
