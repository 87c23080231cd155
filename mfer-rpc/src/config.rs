//! Process configuration for the simulation proxy.
//!
//! Runtime-mutable options (impersonated account, endpoints, address
//! randomisation) live in [`crate::settings`]; this is the fixed
//! configuration read once from the environment.

use crate::settings::{Settings, DEFAULT_ETH_RPC, DEFAULT_MFER_RPC};
use anyhow::{bail, Context, Result};
use std::str::FromStr;
use std::time::Duration;

/// How overlapping bundle replays are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayPolicy {
    /// Replays run concurrently; whichever backend response lands last
    /// becomes the simulated state.
    #[default]
    LastWins,
    /// One replay round trip at a time, in arrival order.
    Serialized,
}

impl FromStr for ReplayPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "last-wins" => Ok(ReplayPolicy::LastWins),
            "serialized" => Ok(ReplayPolicy::Serialized),
            other => bail!("unknown replay policy '{other}' (expected last-wins or serialized)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// File backing the persisted key-value store
    pub store_path: String,

    /// How long the page side waits for the dispatcher before giving up
    pub bridge_timeout: Duration,

    pub replay_policy: ReplayPolicy,

    /// Origin tag every bridge envelope must carry
    pub origin: String,

    /// Simulation backend used until a persisted `mferRPC` overrides it
    pub default_mfer_rpc: String,

    /// Chain endpoint used until a persisted `ETHRPC` overrides it
    pub default_eth_rpc: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: std::env::var("MFER_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: std::env::var("MFER_PORT")
                .unwrap_or_else(|_| "8545".into())
                .parse()
                .context("Invalid MFER_PORT")?,
            store_path: std::env::var("MFER_STORE_PATH")
                .unwrap_or_else(|_| "mfer-store.json".into()),
            bridge_timeout: Duration::from_millis(
                std::env::var("MFER_BRIDGE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "30000".into())
                    .parse()
                    .context("Invalid MFER_BRIDGE_TIMEOUT_MS")?,
            ),
            replay_policy: std::env::var("MFER_REPLAY_POLICY")
                .unwrap_or_else(|_| "last-wins".into())
                .parse()
                .context("Invalid MFER_REPLAY_POLICY")?,
            origin: std::env::var("MFER_ORIGIN")
                .unwrap_or_else(|_| "http://localhost".into()),
            default_mfer_rpc: std::env::var("MFER_RPC_URL")
                .unwrap_or_else(|_| DEFAULT_MFER_RPC.into()),
            default_eth_rpc: std::env::var("MFER_ETH_RPC_URL")
                .unwrap_or_else(|_| DEFAULT_ETH_RPC.into()),
        })
    }

    /// Settings defaults before the persisted store is overlaid.
    pub fn default_settings(&self) -> Settings {
        Settings {
            mfer_rpc: self.default_mfer_rpc.clone(),
            eth_rpc: self.default_eth_rpc.clone(),
            ..Settings::default()
        }
    }
}
