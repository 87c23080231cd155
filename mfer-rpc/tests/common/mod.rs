//! In-process JSON-RPC endpoint for integration tests.
//!
//! Records every request it receives and answers from per-method queues
//! of scripted results, optionally after a delay.

#![allow(dead_code)]

use axum::{extract::State, routing::post, Json, Router};
use mfer_rpc::config::ReplayPolicy;
use mfer_rpc::obfuscator::AddressObfuscator;
use mfer_rpc::rpc::Dispatcher;
use mfer_rpc::settings::{Settings, SettingsStore};
use mfer_rpc::store::Store;
use mfer_rpc::upstream::UpstreamClient;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REAL: &str = "0xab5801a7d398351b8be11c439e05c5b3259aec9b";
pub const PLACEHOLDER: &str = "0x1111111111111111111111111111111111111111";
pub const OTHER: &str = "0x2222222222222222222222222222222222222222";

/// One request as the endpoint saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub id: Value,
    pub method: String,
    pub params: Value,
}

struct Scripted {
    result: Value,
    delay: Duration,
}

#[derive(Default)]
struct Inner {
    requests: Mutex<Vec<Recorded>>,
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
}

#[derive(Clone)]
pub struct MockRpc {
    addr: SocketAddr,
    inner: Arc<Inner>,
}

impl MockRpc {
    pub async fn start() -> Self {
        let inner = Arc::new(Inner::default());
        let app = Router::new().route("/", post(answer)).with_state(inner.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, inner }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue a result for the next request with `method`.
    pub fn add_response(&self, method: &str, result: Value) {
        self.add_delayed_response(method, result, Duration::ZERO);
    }

    pub fn add_delayed_response(&self, method: &str, result: Value, delay: Duration) {
        self.inner
            .responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Scripted { result, delay });
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.requests().iter().filter(|r| r.method == method).count()
    }
}

async fn answer(State(inner): State<Arc<Inner>>, Json(req): Json<Value>) -> Json<Value> {
    let id = req["id"].clone();
    let method = req["method"].as_str().unwrap_or_default().to_string();
    inner.requests.lock().unwrap().push(Recorded {
        id: id.clone(),
        method: method.clone(),
        params: req["params"].clone(),
    });

    let scripted = inner
        .responses
        .lock()
        .unwrap()
        .get_mut(&method)
        .and_then(VecDeque::pop_front);
    match scripted {
        Some(Scripted { result, delay }) => {
            tokio::time::sleep(delay).await;
            Json(json!({"jsonrpc": "2.0", "id": id, "result": result}))
        }
        None => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("unexpected method {method}")}
        })),
    }
}

/// A replay result whose state diff sets the impersonated balance.
pub fn trace_result(last_tx_hash: &str, balance: &str) -> Value {
    json!({
        "stateDiff": {REAL: {"balance": balance}},
        "transactions": [{"hash": last_tx_hash, "from": REAL, "to": OTHER}],
        "transactionReceipts": [{
            "transactionHash": last_tx_hash,
            "logs": [{"address": OTHER}, {"address": OTHER}, {"address": "0xmarker"}]
        }],
        "lastTxHash": last_tx_hash
    })
}

pub struct Harness {
    pub chain: MockRpc,
    pub backend: MockRpc,
    pub store: Arc<Store>,
    pub settings: Arc<SettingsStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub async fn new(randomize: bool, policy: ReplayPolicy) -> Self {
        let chain = MockRpc::start().await;
        let backend = MockRpc::start().await;
        let store = Arc::new(Store::in_memory());
        let settings = Arc::new(SettingsStore::new(Settings {
            addr_randomize: randomize,
            impersonated_account: REAL.into(),
            mfer_rpc: backend.url(),
            eth_rpc: chain.url(),
        }));
        let dispatcher = Arc::new(
            Dispatcher::init(
                settings.clone(),
                store.clone(),
                AddressObfuscator::with_placeholder(PLACEHOLDER),
                UpstreamClient::default(),
                policy,
            )
            .await,
        );
        Self {
            chain,
            backend,
            store,
            settings,
            dispatcher,
        }
    }
}
