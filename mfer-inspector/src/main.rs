//! mfer-inspector: view and edit the simulated transaction bundle.

mod api;
mod bundle;
mod config;
mod processor;

use anyhow::{Context, Result};
use api::Inspector;
use bundle::ProxyClient;
use config::Config;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        proxy = %config.proxy_url,
        store = %config.store_path,
        "Starting mfer-inspector"
    );

    let inspector = Arc::new(Inspector::new(
        config.store_path.clone(),
        ProxyClient::new(config.proxy_url.clone(), reqwest::Client::new()),
    ));
    let app = api::build_router(inspector);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
