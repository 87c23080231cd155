//! HTTP API for the mfer Bundle Inspector.
//!
//! Reads the pending bundle and its receipts from the store file the
//! proxy writes, decodes token events per transaction, and turns edits
//! into full replays issued to the proxy.

use crate::bundle::{self, BundleError, ProxyClient};
use crate::processor::{decode_trace, process_event_logs, ProcessedEvents};

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use mfer_rpc::error::{StoreError, UpstreamError};
use mfer_rpc::store::{Store, TRANSACTION_RECEIPTS_KEY, TX_BUNDLE_KEY};
use mfer_rpc::types::{SimulatedReceipt, TransactionRequest};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct Inspector {
    store_path: PathBuf,
    proxy: ProxyClient,
}

impl Inspector {
    pub fn new(store_path: impl Into<PathBuf>, proxy: ProxyClient) -> Self {
        Self {
            store_path: store_path.into(),
            proxy,
        }
    }

    /// Read `key` from a fresh snapshot of the store file. A missing
    /// key reads as empty.
    async fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, ApiError> {
        let store = Store::open(&self.store_path).await?;
        match store.get_one(key).await {
            Some(value) => serde_json::from_value(value).map_err(ApiError::Corrupt),
            None => Ok(T::default()),
        }
    }

    async fn bundle(&self) -> Result<Vec<TransactionRequest>, ApiError> {
        self.read(TX_BUNDLE_KEY).await
    }

    async fn receipts(&self) -> Result<Vec<SimulatedReceipt>, ApiError> {
        self.read(TRANSACTION_RECEIPTS_KEY).await
    }

    async fn replay(&self, next: Vec<TransactionRequest>) -> Result<ReplayResponse, ApiError> {
        let last_tx_hash = self.proxy.replay(&next).await?;
        Ok(ReplayResponse {
            tx_count: next.len(),
            last_tx_hash,
        })
    }
}

// ── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stored data is unreadable: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("proxy request failed: {0}")]
    Proxy(#[from] UpstreamError),

    #[error("no receipt at index {0}")]
    NoReceipt(usize),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Store(_) | ApiError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Bundle(BundleError::IndexOutOfRange { .. }) | ApiError::NoReceipt(_) => StatusCode::NOT_FOUND,
            ApiError::Bundle(_) => StatusCode::BAD_REQUEST,
            ApiError::Proxy(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

// ── Response Types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ReplayResponse {
    pub tx_count: usize,
    pub last_tx_hash: Option<String>,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub index: usize,
    pub transaction_hash: String,
    pub events: ProcessedEvents,
    /// Execution trace the backend attached to the receipt, if any.
    pub trace: Option<Value>,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub order: Vec<usize>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub tx_count: usize,
    pub receipt_count: usize,
    pub proxy_url: String,
}

// ── Handlers ────────────────────────────────────────────────────

type Shared = State<Arc<Inspector>>;

/// GET /bundle
async fn get_bundle(State(inspector): Shared) -> Result<Json<Vec<TransactionRequest>>, ApiError> {
    Ok(Json(inspector.bundle().await?))
}

/// GET /bundle/export: The bundle as pretty-printed JSON for copying.
async fn export_bundle(State(inspector): Shared) -> Result<Response, ApiError> {
    let bundle = inspector.bundle().await?;
    let text = serde_json::to_string_pretty(&bundle).map_err(ApiError::Corrupt)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], text).into_response())
}

/// GET /receipts
async fn get_receipts(State(inspector): Shared) -> Result<Json<Vec<SimulatedReceipt>>, ApiError> {
    Ok(Json(inspector.receipts().await?))
}

/// GET /bundle/:index/events: Decoded token events of one transaction.
async fn get_events(Path(index): Path<usize>, State(inspector): Shared) -> Result<Json<EventsResponse>, ApiError> {
    let receipts = inspector.receipts().await?;
    let receipt = receipts.get(index).ok_or(ApiError::NoReceipt(index))?;
    Ok(Json(EventsResponse {
        index,
        transaction_hash: receipt.transaction_hash.clone(),
        events: process_event_logs(&receipt.logs),
        trace: decode_trace(&receipt.logs),
    }))
}

/// POST /bundle: Append a transaction built on the default template.
async fn add_transaction(
    State(inspector): Shared,
    Json(fields): Json<Map<String, Value>>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let next = bundle::add(&inspector.bundle().await?, fields)?;
    info!(tx_count = next.len(), "Transaction added");
    Ok(Json(inspector.replay(next).await?))
}

/// PUT /bundle/:index
async fn edit_transaction(
    Path(index): Path<usize>,
    State(inspector): Shared,
    Json(fields): Json<Map<String, Value>>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let next = bundle::edit(&inspector.bundle().await?, index, fields)?;
    info!(index, "Transaction updated");
    Ok(Json(inspector.replay(next).await?))
}

/// DELETE /bundle/:index
async fn delete_transaction(Path(index): Path<usize>, State(inspector): Shared) -> Result<Json<ReplayResponse>, ApiError> {
    let next = bundle::delete(&inspector.bundle().await?, index)?;
    info!(index, "Transaction deleted");
    Ok(Json(inspector.replay(next).await?))
}

/// POST /bundle/reorder
async fn reorder_bundle(
    State(inspector): Shared,
    Json(req): Json<ReorderRequest>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let next = bundle::reorder(&inspector.bundle().await?, &req.order)?;
    info!(order = ?req.order, "Bundle reordered");
    Ok(Json(inspector.replay(next).await?))
}

/// POST /bundle/replay: Replay the stored bundle unchanged.
async fn replay_bundle(State(inspector): Shared) -> Result<Json<ReplayResponse>, ApiError> {
    let current = inspector.bundle().await?;
    Ok(Json(inspector.replay(current).await?))
}

/// POST /bundle/clear
async fn clear_bundle(State(inspector): Shared) -> Result<StatusCode, ApiError> {
    inspector.proxy.clear().await?;
    info!("Bundle cleared");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /health: Health check endpoint.
async fn health(State(inspector): Shared) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "ok".into(),
        tx_count: inspector.bundle().await?.len(),
        receipt_count: inspector.receipts().await?.len(),
        proxy_url: inspector.proxy.url().to_string(),
    }))
}

// ── Router ──────────────────────────────────────────────────────

/// Build the axum router with CORS enabled.
pub fn build_router(inspector: Arc<Inspector>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/bundle", get(get_bundle).post(add_transaction))
        .route("/bundle/export", get(export_bundle))
        .route("/bundle/reorder", post(reorder_bundle))
        .route("/bundle/replay", post(replay_bundle))
        .route("/bundle/clear", post(clear_bundle))
        .route("/bundle/:index", put(edit_transaction).delete(delete_transaction))
        .route("/bundle/:index/events", get(get_events))
        .route("/receipts", get(get_receipts))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(inspector)
}

// ── Tests ───────────────────────────────────────────────────────
