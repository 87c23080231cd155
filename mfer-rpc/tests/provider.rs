//! Page-side path: provider and fetch shim through the bridge into the
//! dispatcher, with in-process endpoints behind it.

mod common;

use common::{trace_result, Harness, OTHER, PLACEHOLDER, REAL};
use mfer_rpc::bridge::PageBridge;
use mfer_rpc::config::ReplayPolicy;
use mfer_rpc::intercept::{FetchInit, FetchShim};
use mfer_rpc::provider::{Provider, RequestArguments};
use mfer_rpc::types::JsonRpcResponse;
use mfer_rpc::upstream::TRACE_BUNDLE_METHOD;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn page(h: &Harness) -> (Provider, FetchShim) {
    let bridge = PageBridge::connect(h.dispatcher.clone(), "http://localhost", Duration::from_secs(5));
    let shim = FetchShim::new(reqwest::Client::new());
    shim.install(bridge.clone());
    (Provider::connect(bridge).await, shim)
}

#[tokio::test]
async fn test_chain_id_fetched_once() {
    let h = Harness::new(false, ReplayPolicy::LastWins).await;
    h.chain.add_response("eth_chainId", json!("0x1"));
    let (provider, _) = page(&h).await;

    for _ in 0..3 {
        let v = provider
            .request(RequestArguments::new("eth_chainId", vec![]))
            .await
            .unwrap();
        assert_eq!(v, json!("0x1"));
    }
    let v = provider
        .request(RequestArguments::new("net_version", vec![]))
        .await
        .unwrap();
    assert_eq!(v, json!("1"));
    assert_eq!(h.chain.count("eth_chainId"), 1);
    assert_eq!(h.chain.count("net_version"), 0);
}

#[tokio::test]
async fn test_chain_id_failure_falls_through_later() {
    let h = Harness::new(false, ReplayPolicy::LastWins).await;
    let (provider, _) = page(&h).await;
    assert!(provider.chain_id().is_none());

    h.chain.add_response("eth_chainId", json!("0x5"));
    let v = provider
        .request(RequestArguments::new("eth_chainId", vec![]))
        .await
        .unwrap();
    assert_eq!(v, json!("0x5"));
    assert_eq!(h.chain.count("eth_chainId"), 2);
}

#[tokio::test]
async fn test_randomized_accounts_through_provider() {
    let h = Harness::new(true, ReplayPolicy::LastWins).await;
    h.chain.add_response("eth_chainId", json!("0x1"));
    let (provider, _) = page(&h).await;
    assert_eq!(provider.enable().await.unwrap(), json!([PLACEHOLDER]));
}

#[tokio::test]
async fn test_send_transaction_through_provider() {
    let h = Harness::new(true, ReplayPolicy::LastWins).await;
    h.chain.add_response("eth_chainId", json!("0x1"));
    h.backend.add_response(TRACE_BUNDLE_METHOD, trace_result("0xabc", "0x64"));
    let (provider, _) = page(&h).await;

    let hash = provider
        .request(RequestArguments::new(
            "eth_sendTransaction",
            vec![json!({"from": PLACEHOLDER, "to": OTHER, "value": "0x1"})],
        ))
        .await
        .unwrap();
    assert_eq!(hash, json!("0xabc"));
    assert_eq!(h.dispatcher.tx_bundle()[0].from, REAL);

    let balance = provider
        .request(RequestArguments::new("eth_getBalance", vec![json!(PLACEHOLDER), json!("latest")]))
        .await
        .unwrap();
    assert_eq!(balance, json!("0x64"));
}

#[tokio::test]
async fn test_fetch_shim_reroutes_eth_call_with_overrides() {
    let h = Harness::new(false, ReplayPolicy::LastWins).await;
    h.chain.add_response("eth_chainId", json!("0x1"));
    h.chain.add_response("eth_call", json!("0x02"));
    h.backend.add_response(TRACE_BUNDLE_METHOD, trace_result("0xabc", "0x64"));
    let (provider, shim) = page(&h).await;
    provider
        .request(RequestArguments::new(
            "eth_sendTransaction",
            vec![json!({"from": REAL, "to": OTHER})],
        ))
        .await
        .unwrap();

    // Aimed at a closed port: only the bridge can answer.
    let body = json!({"jsonrpc": "2.0", "id": 77, "method": "eth_call", "params": [{"to": OTHER}]});
    let resp = shim
        .fetch("http://127.0.0.1:9", FetchInit::json(body.to_string()))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.content_type.as_deref(), Some("application/json"));

    let parsed: JsonRpcResponse = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(parsed.id, json!(77));
    assert_eq!(parsed.result, Some(json!("0x02")));
    let call = h.chain.requests().into_iter().find(|r| r.method == "eth_call").unwrap();
    assert_eq!(call.params[2], json!({REAL: {"balance": "0x64"}}));
}

#[tokio::test]
async fn test_fetch_shim_passes_other_bodies_to_network() {
    let h = Harness::new(false, ReplayPolicy::LastWins).await;
    h.chain.add_response("eth_chainId", json!("0x1"));
    h.chain.add_response("eth_blockNumber", json!("0x99"));
    let (_, shim) = page(&h).await;

    let body = json!({"jsonrpc": "2.0", "id": 5, "method": "eth_blockNumber", "params": []});
    let resp = shim
        .fetch(&h.chain.url(), FetchInit::json(body.to_string()))
        .await
        .unwrap();
    let parsed: JsonRpcResponse = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(parsed.result, Some(json!("0x99")));
    assert_eq!(h.chain.count("eth_blockNumber"), 1);
}

#[tokio::test]
async fn test_shared_bridge_serves_provider_and_shim() {
    let h = Harness::new(false, ReplayPolicy::LastWins).await;
    h.chain.add_response("eth_chainId", json!("0x1"));
    let bridge = PageBridge::connect(h.dispatcher.clone(), "http://localhost", Duration::from_secs(5));
    let shim = Arc::new(FetchShim::new(reqwest::Client::new()));
    assert!(shim.install(bridge.clone()));
    let provider = Provider::connect(bridge.clone()).await;

    let gas = provider
        .request(RequestArguments::new("eth_estimateGas", vec![json!({})]))
        .await
        .unwrap();
    assert_eq!(gas, json!("0xffffff"));
    assert_eq!(bridge.pending_count(), 0);
}
