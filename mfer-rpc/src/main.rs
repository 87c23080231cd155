//! mfer-rpc: wallet JSON-RPC proxy backed by bundle simulation.

use anyhow::{Context, Result};
use mfer_rpc::config::Config;
use mfer_rpc::server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!(
        store = %config.store_path,
        replay_policy = ?config.replay_policy,
        origin = %config.origin,
        "Starting mfer-rpc"
    );

    let state = server::bootstrap(&config).await?;
    let app = server::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
