//! Process-wide runtime settings.
//!
//! Seeded from defaults, overlaid with whatever the persisted store
//! holds at start, then kept in sync with store change notifications.

use crate::error::StoreError;
use crate::store::{Store, StoreChange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const ADDR_RANDOMIZE: &str = "addrRandomize";
pub const IMPERSONATED_ACCOUNT: &str = "impersonatedAccount";
pub const MFER_RPC: &str = "mferRPC";
pub const ETH_RPC: &str = "ETHRPC";

/// Every option name the store recognises.
pub const SETTING_KEYS: &[&str] = &[ADDR_RANDOMIZE, IMPERSONATED_ACCOUNT, MFER_RPC, ETH_RPC];

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
pub const DEFAULT_MFER_RPC: &str = "http://127.0.0.1:8547";
pub const DEFAULT_ETH_RPC: &str = "https://rpc.ankr.com/eth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "addrRandomize")]
    pub addr_randomize: bool,
    #[serde(rename = "impersonatedAccount")]
    pub impersonated_account: String,
    /// Simulation backend endpoint.
    #[serde(rename = "mferRPC")]
    pub mfer_rpc: String,
    /// Real chain endpoint.
    #[serde(rename = "ETHRPC")]
    pub eth_rpc: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            addr_randomize: false,
            impersonated_account: ZERO_ADDRESS.into(),
            mfer_rpc: DEFAULT_MFER_RPC.into(),
            eth_rpc: DEFAULT_ETH_RPC.into(),
        }
    }
}

impl Settings {
    /// Overwrite one option. Returns `false` for unknown keys and for
    /// values of the wrong JSON type.
    pub fn apply(&mut self, key: &str, value: &Value) -> bool {
        match (key, value) {
            (ADDR_RANDOMIZE, Value::Bool(b)) => self.addr_randomize = *b,
            (IMPERSONATED_ACCOUNT, Value::String(s)) => self.impersonated_account = s.clone(),
            (MFER_RPC, Value::String(s)) => self.mfer_rpc = s.clone(),
            (ETH_RPC, Value::String(s)) => self.eth_rpc = s.clone(),
            _ => return false,
        }
        true
    }
}

pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(defaults: Settings) -> Self {
        Self {
            inner: RwLock::new(defaults),
        }
    }

    /// Overlay every recognised key present in `store` onto the
    /// current values. Missing keys keep their defaults.
    pub async fn load(&self, store: &Store) {
        let saved = store.get(SETTING_KEYS).await;
        for (key, value) in &saved {
            self.on_change(key, value);
        }
        let settings = self.snapshot();
        info!(
            impersonated = %settings.impersonated_account,
            randomize = settings.addr_randomize,
            mfer_rpc = %settings.mfer_rpc,
            eth_rpc = %settings.eth_rpc,
            "Settings loaded"
        );
    }

    /// Apply an external change notification. Keys that are not
    /// setting names are ignored.
    pub fn on_change(&self, key: &str, value: &Value) {
        if !SETTING_KEYS.contains(&key) {
            return;
        }
        let mut settings = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if settings.apply(key, value) {
            debug!(key, "Setting updated");
        } else {
            warn!(key, value = %value, "Ignoring setting with unexpected type");
        }
    }

    /// Persist a setting; the in-memory value follows through the
    /// change notification (or directly when nothing is watching).
    pub async fn write(&self, store: &Store, key: &str, value: Value) -> Result<(), StoreError> {
        self.on_change(key, &value);
        store.set_one(key, value).await
    }

    pub fn snapshot(&self) -> Settings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Follow store change notifications for the life of the process.
    pub fn spawn_watcher(
        self: Arc<Self>,
        mut changes: broadcast::Receiver<StoreChange>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => self.on_change(&change.key, &change.new_value),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Settings watcher lagged behind store changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert!(!s.addr_randomize);
        assert_eq!(s.impersonated_account, ZERO_ADDRESS);
    }

    #[tokio::test]
    async fn test_load_overlays_present_keys_only() {
        let store = Store::in_memory();
        store.set_one(ADDR_RANDOMIZE, json!(true)).await.unwrap();
        store.set_one("unrelated", json!("x")).await.unwrap();

        let settings = SettingsStore::new(Settings::default());
        settings.load(&store).await;

        let snap = settings.snapshot();
        assert!(snap.addr_randomize);
        assert_eq!(snap.impersonated_account, ZERO_ADDRESS);
        assert_eq!(snap.eth_rpc, DEFAULT_ETH_RPC);
    }

    #[test]
    fn test_on_change_ignores_unknown_key() {
        let settings = SettingsStore::new(Settings::default());
        settings.on_change("txBundle", &json!([]));
        assert_eq!(settings.snapshot(), Settings::default());
    }

    #[test]
    fn test_on_change_ignores_wrong_type() {
        let settings = SettingsStore::new(Settings::default());
        settings.on_change(ADDR_RANDOMIZE, &json!("yes"));
        assert!(!settings.snapshot().addr_randomize);
    }

    #[test]
    fn test_on_change_overwrites_immediately() {
        let settings = SettingsStore::new(Settings::default());
        settings.on_change(IMPERSONATED_ACCOUNT, &json!("0xAbC"));
        assert_eq!(settings.snapshot().impersonated_account, "0xAbC");
    }

    #[tokio::test]
    async fn test_watcher_follows_store_writes() {
        let store = Store::in_memory();
        let settings = Arc::new(SettingsStore::new(Settings::default()));
        let handle = settings.clone().spawn_watcher(store.subscribe());

        store
            .set_one(ETH_RPC, json!("http://localhost:9999"))
            .await
            .unwrap();

        let mut updated = false;
        for _ in 0..50 {
            if settings.snapshot().eth_rpc == "http://localhost:9999" {
                updated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(updated);
        handle.abort();
    }

    #[tokio::test]
    async fn test_write_persists_and_applies() {
        let store = Store::in_memory();
        let settings = SettingsStore::new(Settings::default());
        settings
            .write(&store, MFER_RPC, json!("http://sim"))
            .await
            .unwrap();
        assert_eq!(settings.snapshot().mfer_rpc, "http://sim");
        assert_eq!(store.get_one(MFER_RPC).await, Some(json!("http://sim")));
    }
}
