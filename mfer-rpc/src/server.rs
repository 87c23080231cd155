//! HTTP front end.
//!
//! Three ways in: `/` behaves like the injected provider, `/fetch`
//! behaves like the page's patched network primitive, and `/extension`
//! talks to the dispatcher directly (that is what the inspector uses).
//! `/settings` reads and writes the runtime options.

use crate::bridge::PageBridge;
use crate::config::Config;
use crate::error::{FetchError, ProviderError};
use crate::intercept::{FetchInit, FetchShim};
use crate::obfuscator::AddressObfuscator;
use crate::provider::{payload_response, Callback, Provider, RequestArguments, SendAsyncPayload, SendAsyncResult};
use crate::rpc::Dispatcher;
use crate::settings::{Settings, SettingsStore};
use crate::store::Store;
use crate::types::{JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR, INVALID_PARAMS};
use crate::upstream::UpstreamClient;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub settings: Arc<SettingsStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub provider: Arc<Provider>,
    pub shim: Arc<FetchShim>,
}

#[derive(Debug, Deserialize)]
pub struct FetchParams {
    pub url: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub tx_count: usize,
    pub receipt_count: usize,
    pub fetch_intercepted: bool,
}

// ── Handlers ────────────────────────────────────────────────────

/// POST /: A single payload or a batch, answered the way the injected
/// provider would.
async fn provider_rpc(State(state): State<AppState>, Json(body): Json<Value>) -> Json<Value> {
    let payload = serde_json::from_value::<SendAsyncPayload>(body).ok();

    if let Some(SendAsyncPayload::Single(payload)) = payload {
        let result = state
            .provider
            .request(RequestArguments {
                method: payload.method.clone(),
                params: Some(payload.params.clone()),
            })
            .await;
        return Json(to_json(payload_response(&payload, result)));
    }

    let (tx, rx) = oneshot::channel();
    let cb: Callback = Box::new(move |r| {
        let _ = tx.send(r);
    });
    state.provider.send_async(payload, Some(cb)).await;

    match rx.await {
        Ok(Ok(SendAsyncResult::Batch(responses))) => Json(to_json(responses)),
        Ok(Ok(SendAsyncResult::Single(response))) => Json(to_json(response)),
        Ok(Err(e)) => Json(to_json(provider_error(e))),
        Err(_) => Json(to_json(JsonRpcResponse::error(
            Value::Null,
            INTERNAL_ERROR,
            "provider dropped the callback",
        ))),
    }
}

/// ANY /fetch?url=…: The request goes out to `url` with its method and
/// headers unless the body is a call the shim reroutes through the bridge.
async fn fetch(
    State(state): State<AppState>,
    Query(params): Query<FetchParams>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let init = FetchInit {
        method,
        headers,
        body: (!body.is_empty()).then_some(body),
    };
    match state.shim.fetch(&params.url, init).await {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = resp.content_type.unwrap_or_else(|| "application/octet-stream".into());
            (status, [(header::CONTENT_TYPE, content_type)], resp.body).into_response()
        }
        Err(e) => {
            warn!(url = %params.url, error = %e, "Fetch failed");
            let status = match e {
                FetchError::Bridge(_) => StatusCode::GATEWAY_TIMEOUT,
                FetchError::Network(_) | FetchError::Encode(_) => StatusCode::BAD_GATEWAY,
            };
            (status, e.to_string()).into_response()
        }
    }
}

/// POST /extension: Straight to the dispatcher, no bridge in between.
async fn extension_rpc(State(state): State<AppState>, Json(body): Json<Value>) -> Json<JsonRpcResponse> {
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    match serde_json::from_value::<JsonRpcRequest>(body) {
        Ok(req) => Json(state.dispatcher.handle_rpc(req).await),
        Err(e) => Json(JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid request: {e}"))),
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.dispatcher.status();
    Json(HealthResponse {
        status: "ok".into(),
        tx_count: status.tx_count,
        receipt_count: status.receipt_count,
        fetch_intercepted: state.shim.is_installed(),
    })
}

/// GET /settings
async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.snapshot())
}

/// PUT /settings: Persist any subset of the options. The whole request
/// is rejected if one entry is unknown or has the wrong type.
async fn put_settings(
    State(state): State<AppState>,
    Json(entries): Json<Map<String, Value>>,
) -> Result<Json<Settings>, (StatusCode, String)> {
    let mut check = state.settings.snapshot();
    if let Some((key, _)) = entries.iter().find(|(k, v)| !check.apply(k, v)) {
        return Err((StatusCode::BAD_REQUEST, format!("Invalid setting: {key}")));
    }
    for (key, value) in entries {
        state
            .settings
            .write(&state.store, &key, value)
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }
    Ok(Json(state.settings.snapshot()))
}

fn provider_error(e: ProviderError) -> JsonRpcResponse {
    match e {
        ProviderError::Rpc { code, message } => JsonRpcResponse::error(Value::Null, code, message),
        other => JsonRpcResponse::error(Value::Null, INTERNAL_ERROR, other.to_string()),
    }
}

fn to_json<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ── Router ──────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    Router::new()
        .route("/", post(provider_rpc))
        .route("/fetch", any(fetch))
        .route("/extension", post(extension_rpc))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire every component from `config` and return the ready state.
pub async fn bootstrap(config: &Config) -> Result<AppState> {
    let store = Arc::new(
        Store::open(&config.store_path)
            .await
            .with_context(|| format!("Failed to open store at {}", config.store_path))?,
    );

    let settings = Arc::new(SettingsStore::new(config.default_settings()));
    settings.load(&store).await;
    settings.clone().spawn_watcher(store.subscribe());

    let http = reqwest::Client::new();
    let obfuscator = AddressObfuscator::random();
    info!(placeholder = obfuscator.placeholder(), "Generated placeholder address");

    let dispatcher = Arc::new(
        Dispatcher::init(
            settings.clone(),
            store.clone(),
            obfuscator,
            UpstreamClient::new(http.clone()),
            config.replay_policy,
        )
        .await,
    );

    let bridge = PageBridge::connect(dispatcher.clone(), config.origin.clone(), config.bridge_timeout);
    let shim = Arc::new(FetchShim::new(http));
    shim.install(bridge.clone());
    let provider = Arc::new(Provider::connect(bridge).await);

    Ok(AppState {
        store,
        settings,
        dispatcher,
        provider,
        shim,
    })
}

// ── Tests ───────────────────────────────────────────────────────
