//! Inspector configuration, read once from the environment.

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Direct dispatcher endpoint of the proxy
    pub proxy_url: String,

    /// Store file shared with the proxy
    pub store_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: std::env::var("INSPECTOR_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: std::env::var("INSPECTOR_PORT")
                .unwrap_or_else(|_| "8546".into())
                .parse()
                .context("Invalid INSPECTOR_PORT")?,
            proxy_url: std::env::var("INSPECTOR_PROXY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8545/extension".into()),
            store_path: std::env::var("MFER_STORE_PATH")
                .unwrap_or_else(|_| "mfer-store.json".into()),
        })
    }
}
