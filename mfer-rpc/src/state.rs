//! In-memory simulation state.
//!
//! The pending bundle plus everything the last replay of it produced.
//! The persisted store only seeds this at start; within a session the
//! in-memory copy answers every read.

use crate::store::{Store, TRANSACTION_RECEIPTS_KEY, TX_BUNDLE_KEY};
use crate::types::{
    AccountDiff, SimulatedReceipt, SimulatedTransaction, StateDiff, TraceBundleResult,
    TransactionRequest,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct SimulationState {
    state_diff: StateDiff,
    tx_bundle: Vec<TransactionRequest>,
    transactions: Vec<SimulatedTransaction>,
    transaction_receipts: Vec<SimulatedReceipt>,
    /// Bumped every time the bundle is replaced.
    bundle_generation: u64,
    /// Bumped every time replay output is installed or cleared.
    trace_generation: u64,
    last_replay_at: Option<DateTime<Utc>>,
}

/// Summary returned by `mfer_bundleStatus`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    pub tx_count: usize,
    pub receipt_count: usize,
    pub last_replay_at: Option<DateTime<Utc>>,
}

impl SimulationState {
    /// Seed the bundle and receipts from the persisted store. Entries
    /// that no longer parse are dropped with a warning.
    pub async fn load(store: &Store) -> Self {
        let mut state = Self::default();
        if let Some(value) = store.get_one(TX_BUNDLE_KEY).await {
            match serde_json::from_value(value) {
                Ok(bundle) => state.tx_bundle = bundle,
                Err(e) => warn!(error = %e, "Discarding unreadable persisted txBundle"),
            }
        }
        if let Some(value) = store.get_one(TRANSACTION_RECEIPTS_KEY).await {
            match serde_json::from_value(value) {
                Ok(receipts) => state.transaction_receipts = receipts,
                Err(e) => warn!(error = %e, "Discarding unreadable persisted receipts"),
            }
        }
        info!(
            tx_count = state.tx_bundle.len(),
            receipt_count = state.transaction_receipts.len(),
            "Simulation state seeded from store"
        );
        state
    }

    pub fn clear(&mut self) {
        self.state_diff.clear();
        self.tx_bundle.clear();
        self.transactions.clear();
        self.transaction_receipts.clear();
        self.bundle_generation += 1;
        self.trace_generation += 1;
        self.last_replay_at = None;
    }

    pub fn tx_bundle(&self) -> &[TransactionRequest] {
        &self.tx_bundle
    }

    pub fn state_diff(&self) -> &StateDiff {
        &self.state_diff
    }

    pub fn transaction_receipts(&self) -> &[SimulatedReceipt] {
        &self.transaction_receipts
    }

    pub fn bundle_generation(&self) -> u64 {
        self.bundle_generation
    }

    pub fn trace_generation(&self) -> u64 {
        self.trace_generation
    }

    /// Append to the bundle, returning the new generation.
    pub fn push_transaction(&mut self, tx: TransactionRequest) -> u64 {
        self.tx_bundle.push(tx);
        self.bundle_generation += 1;
        self.bundle_generation
    }

    /// Replace the bundle wholesale, returning the new generation.
    pub fn replace_bundle(&mut self, bundle: Vec<TransactionRequest>) -> u64 {
        self.tx_bundle = bundle;
        self.bundle_generation += 1;
        self.bundle_generation
    }

    /// Put `previous` back if nothing has replaced the bundle since
    /// `generation` was handed out. Returns whether it did.
    pub fn restore_bundle(&mut self, generation: u64, previous: Vec<TransactionRequest>) -> bool {
        if self.bundle_generation != generation {
            return false;
        }
        self.tx_bundle = previous;
        self.bundle_generation += 1;
        true
    }

    /// Install the outcome of a replay, returning the new trace generation.
    pub fn apply_trace(&mut self, result: TraceBundleResult) -> u64 {
        self.state_diff = result.state_diff;
        self.transactions = result.transactions;
        self.transaction_receipts = result.transaction_receipts;
        self.last_replay_at = Some(Utc::now());
        self.trace_generation += 1;
        self.trace_generation
    }

    fn account(&self, address: &str) -> Option<&AccountDiff> {
        self.state_diff.get(&address.to_lowercase())
    }

    /// Simulated balance of `address`, if the last replay changed it.
    pub fn balance_override(&self, address: &str) -> Option<Value> {
        self.account(address)
            .and_then(|diff| diff.balance.as_ref())
            .filter(|v| is_present(v))
            .cloned()
    }

    /// Simulated code of `address`, if the last replay changed it.
    pub fn code_override(&self, address: &str) -> Option<String> {
        self.account(address)
            .and_then(|diff| diff.code.clone())
            .filter(|code| !code.is_empty())
    }

    pub fn find_transaction(&self, hash: &str) -> Option<&SimulatedTransaction> {
        self.transactions.iter().find(|tx| tx.hash == hash)
    }

    /// Cached receipt for `hash` with the backend's marker log removed.
    pub fn find_receipt(&self, hash: &str) -> Option<SimulatedReceipt> {
        self.transaction_receipts
            .iter()
            .find(|r| r.transaction_hash == hash)
            .map(SimulatedReceipt::public_view)
    }

    pub fn status(&self) -> BundleStatus {
        BundleStatus {
            tx_count: self.tx_bundle.len(),
            receipt_count: self.transaction_receipts.len(),
            last_replay_at: self.last_replay_at,
        }
    }
}

/// Whether an override value should be served (null, `""` and `0` do not count).
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Bool(b) => *b,
        _ => true,
    }
}

// ── Tests ───────────────────────────────────────────────────────
