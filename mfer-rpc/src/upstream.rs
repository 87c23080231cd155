//! HTTP client for the two upstream endpoints: the real chain node
//! and the simulation backend.

use crate::error::UpstreamError;
use crate::types::{JsonRpcRequest, JsonRpcResponse, TraceBundleResult, TransactionRequest};
use serde_json::Value;
use tracing::debug;

pub const TRACE_BUNDLE_METHOD: &str = "mfer_traceTransactionBundle";

#[derive(Debug, Clone, Default)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// POST `req` to `url` and hand back the endpoint's response as is.
    pub async fn call(&self, url: &str, req: &JsonRpcRequest) -> Result<JsonRpcResponse, UpstreamError> {
        debug!(method = %req.method, url, "Forwarding to upstream");
        let resp = self
            .http
            .post(url)
            .json(req)
            .send()
            .await
            .map_err(UpstreamError::Connection)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }
        resp.json::<JsonRpcResponse>()
            .await
            .map_err(UpstreamError::Parse)
    }

    /// Replay `bundle` on the simulation backend.
    pub async fn trace_bundle(
        &self,
        url: &str,
        id: u64,
        bundle: &[TransactionRequest],
    ) -> Result<TraceBundleResult, UpstreamError> {
        let req = JsonRpcRequest::new(id, TRACE_BUNDLE_METHOD, vec![serde_json::to_value(bundle)?]);
        let resp = self.call(url, &req).await?;
        if let Some(err) = resp.error {
            return Err(UpstreamError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        match resp.result {
            Some(Value::Null) | None => Err(UpstreamError::MissingResult),
            Some(result) => Ok(serde_json::from_value(result)?),
        }
    }
}
