//! Outbound fetch interception.
//!
//! Once installed, any outgoing request whose body is a JSON-RPC
//! `eth_call` or `eth_estimateGas` is answered through the bridge so
//! the dispatcher can apply simulated state. Everything else, including
//! bodies that do not parse, goes out over the network untouched.

use crate::bridge::PageBridge;
use crate::error::FetchError;
use crate::types::JsonRpcRequest;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

const INTERCEPTED_METHODS: &[&str] = &["eth_call", "eth_estimateGas"];

/// What the caller handed to the network primitive besides the URL.
#[derive(Debug, Clone)]
pub struct FetchInit {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchInit {
    /// A JSON POST, the shape wallet libraries use for RPC calls.
    pub fn json(body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            headers,
            body: Some(body.into()),
        }
    }
}

/// What the network primitive hands back to its caller.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub struct FetchShim {
    http: reqwest::Client,
    bridge: OnceLock<Arc<PageBridge>>,
}

impl FetchShim {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            bridge: OnceLock::new(),
        }
    }

    /// Route interceptable calls through `bridge`. Only the first call
    /// has any effect; returns whether this call installed it.
    pub fn install(&self, bridge: Arc<PageBridge>) -> bool {
        let installed = self.bridge.set(bridge).is_ok();
        if installed {
            info!("Fetch interception installed");
        }
        installed
    }

    pub fn is_installed(&self) -> bool {
        self.bridge.get().is_some()
    }

    /// Answer `init` aimed at `url`. Calls that are not intercepted go
    /// out with the caller's method, headers and body as given.
    pub async fn fetch(&self, url: &str, init: FetchInit) -> Result<FetchResponse, FetchError> {
        if let (Some(bridge), Some(payload)) = (self.bridge.get(), init.body.as_deref().and_then(interceptable)) {
            debug!(method = %payload.method, id = payload.id, "Intercepted outbound call");
            let response = bridge.send(payload).await?;
            return Ok(FetchResponse {
                status: 200,
                content_type: Some("application/json".into()),
                body: Bytes::from(serde_json::to_vec(&response)?),
            });
        }

        let mut headers = init.headers;
        // Recomputed by the client for the new target.
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        let mut request = self.http.request(init.method, url).headers(headers);
        if let Some(body) = init.body {
            request = request.body(body);
        }
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(FetchResponse {
            status,
            content_type,
            body: resp.bytes().await?,
        })
    }
}

/// The payload to reroute, if `body` is one of the intercepted calls.
/// Anything that does not parse is simply not interceptable.
pub fn interceptable(body: &[u8]) -> Option<JsonRpcRequest> {
    let payload: JsonRpcRequest = serde_json::from_slice(body).ok()?;
    INTERCEPTED_METHODS
        .contains(&payload.method.as_str())
        .then_some(payload)
}

// ── Tests ───────────────────────────────────────────────────────
