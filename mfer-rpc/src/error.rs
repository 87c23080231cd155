//! Error types of the proxy library.

use thiserror::Error;

/// Failure talking to the chain endpoint or the simulation backend.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream connection error: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("upstream parse error: {0}")]
    Parse(#[source] reqwest::Error),

    #[error("upstream JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed upstream result: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("upstream response carried no result")]
    MissingResult,
}

/// Failure reading or writing the persisted key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store file does not hold a JSON object")]
    NotAnObject,
}

/// Failure of a request/response round trip across the bridge.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("no response for request {id} within {timeout_ms}ms")]
    Timeout { id: u64, timeout_ms: u64 },

    #[error("request {0} was superseded by a newer request with the same id")]
    Superseded(u64),

    #[error("bridge relay is closed")]
    Closed,
}

/// Failure surfaced to callers of the wallet provider.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid Payload")]
    InvalidPayload,

    #[error("Invalid or undefined callback provided to sendAsync")]
    InvalidCallback,
}

/// Failure of an outbound fetch through the interception shim.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("response encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
