//! Event processor: token events out of simulated receipts.
//!
//! Recognises the ERC20/ERC721 `Transfer` and `Approval` events and
//! `ApprovalForAll`, tells the token standards apart by topic count, and
//! accumulates the net ERC20 balance change per holder and token.

use alloy_primitives::{B256, U256};
use alloy_sol_types::{sol, SolEvent};
use mfer_rpc::types::Log;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
    event Approval(address indexed owner, address indexed spender, uint256 value);
    event ApprovalForAll(address indexed owner, address indexed operator, bool approved);
}

/// `ApprovalForAll` data word meaning "revoked".
const FALSE_WORD: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

// ── Decoded events ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Erc20Transfer {
    pub token: String,
    pub from: String,
    pub to: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Erc721Transfer {
    pub token: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "tokenID")]
    pub token_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Erc20Approval {
    pub token: String,
    pub owner: String,
    pub spender: String,
    /// Decimal amount, or `infinite` for anything at or above 2^254.
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Erc721Approval {
    pub token: String,
    pub owner: String,
    pub spender: String,
    #[serde(rename = "tokenID")]
    pub token_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorApproval {
    pub token: String,
    pub owner: String,
    pub operator: String,
    /// `YES` or `NO`.
    pub approved: String,
}

/// Net movement of one token for one holder.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct NetChange {
    credit: U256,
    debit: U256,
}

impl NetChange {
    fn render(&self) -> String {
        if self.credit >= self.debit {
            (self.credit - self.debit).to_string()
        } else {
            format!("-{}", self.debit - self.credit)
        }
    }
}

/// Everything decoded from one receipt's logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessedEvents {
    #[serde(rename = "approvalERC20Events")]
    pub approval_erc20: Vec<Erc20Approval>,
    #[serde(rename = "approvalERC721Events")]
    pub approval_erc721: Vec<Erc721Approval>,
    #[serde(rename = "approvalForAllEvents")]
    pub approval_for_all: Vec<OperatorApproval>,
    #[serde(rename = "transferERC20Events")]
    pub transfer_erc20: Vec<Erc20Transfer>,
    #[serde(rename = "transferERC721Events")]
    pub transfer_erc721: Vec<Erc721Transfer>,
    /// holder → token → signed decimal net change.
    #[serde(rename = "userTokenBalance")]
    pub user_token_balance: BTreeMap<String, BTreeMap<String, String>>,
}

// ── Processing ──────────────────────────────────────────────────

/// Decode every recognised event in `logs`. Logs with no topics, an
/// unknown signature or an unexpected topic count are skipped.
pub fn process_event_logs(logs: &[Log]) -> ProcessedEvents {
    let mut events = ProcessedEvents::default();
    let mut balances: BTreeMap<String, BTreeMap<String, NetChange>> = BTreeMap::new();

    for log in logs {
        let Some(signature) = log.topics.first().and_then(|t| t.parse::<B256>().ok()) else {
            continue;
        };

        if signature == Transfer::SIGNATURE_HASH {
            let (from, to) = (topic_address(log.topics.get(1)), topic_address(log.topics.get(2)));
            match log.topics.len() {
                3 => {
                    let amount = parse_u256(&log.data).unwrap_or_default();
                    let from_entry = balances
                        .entry(from.clone())
                        .or_default()
                        .entry(log.address.clone())
                        .or_default();
                    from_entry.debit = from_entry.debit.saturating_add(amount);
                    let to_entry = balances
                        .entry(to.clone())
                        .or_default()
                        .entry(log.address.clone())
                        .or_default();
                    to_entry.credit = to_entry.credit.saturating_add(amount);

                    events.transfer_erc20.push(Erc20Transfer {
                        token: log.address.clone(),
                        from,
                        to,
                        amount: amount.to_string(),
                    });
                }
                4 => events.transfer_erc721.push(Erc721Transfer {
                    token: log.address.clone(),
                    from,
                    to,
                    token_id: token_id(&log.topics[3]),
                }),
                n => debug!(topics = n, "Skipping Transfer with unexpected topic count"),
            }
        } else if signature == Approval::SIGNATURE_HASH {
            let (owner, spender) = (topic_address(log.topics.get(1)), topic_address(log.topics.get(2)));
            match log.topics.len() {
                3 => {
                    let amount = parse_u256(&log.data).unwrap_or_default();
                    events.approval_erc20.push(Erc20Approval {
                        token: log.address.clone(),
                        owner,
                        spender,
                        amount: approval_amount(amount),
                    });
                }
                4 => events.approval_erc721.push(Erc721Approval {
                    token: log.address.clone(),
                    owner,
                    spender,
                    token_id: token_id(&log.topics[3]),
                }),
                n => debug!(topics = n, "Skipping Approval with unexpected topic count"),
            }
        } else if signature == ApprovalForAll::SIGNATURE_HASH {
            events.approval_for_all.push(OperatorApproval {
                token: log.address.clone(),
                owner: topic_address(log.topics.get(1)),
                operator: topic_address(log.topics.get(2)),
                approved: (if log.data != FALSE_WORD { "YES" } else { "NO" }).into(),
            });
        }
    }

    events.user_token_balance = balances
        .into_iter()
        .map(|(holder, tokens)| {
            let tokens = tokens
                .into_iter()
                .map(|(token, change)| (token, change.render()))
                .collect();
            (holder, tokens)
        })
        .collect();
    events
}

/// The backend's execution trace, carried as UTF-8 JSON in the data of
/// the receipt's last log.
pub fn decode_trace(logs: &[Log]) -> Option<Value> {
    let data = logs.last()?.data.trim_start_matches("0x");
    if data.is_empty() {
        return None;
    }
    let bytes = hex::decode(data).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    serde_json::from_str(&text).ok()
}

/// Address in the low 20 bytes of an indexed topic.
fn topic_address(topic: Option<&String>) -> String {
    let topic = topic.map(String::as_str).unwrap_or_default();
    let low = topic.get(topic.len().saturating_sub(40)..).unwrap_or(topic);
    format!("0x{low}")
}

fn parse_u256(hex: &str) -> Option<U256> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() {
        return Some(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).ok()
}

/// Small ids print in decimal; anything wider than 128 bits is most
/// likely a hash and keeps its raw topic form.
fn token_id(topic: &str) -> String {
    match parse_u256(topic) {
        Some(id) if (id >> 128usize) == U256::ZERO => id.to_string(),
        _ => topic.to_string(),
    }
}

fn approval_amount(amount: U256) -> String {
    if (amount >> 254usize) == U256::ZERO {
        amount.to_string()
    } else {
        "infinite".into()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";
    const ALICE: &str = "000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const BOB: &str = "000000000000000000000000bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn topic(s: &str) -> String {
        format!("0x{s}")
    }

    fn hex_topic(hash: B256) -> String {
        format!("0x{}", hex::encode(hash))
    }

    fn word(n: u64) -> String {
        format!("0x{:064x}", n)
    }

    fn log(signature: B256, topics: &[String], data: &str) -> Log {
        let mut all = vec![hex_topic(signature)];
        all.extend_from_slice(topics);
        Log {
            address: TOKEN.into(),
            topics: all,
            data: data.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_signature_hashes_match_known_topics() {
        assert_eq!(
            hex_topic(Transfer::SIGNATURE_HASH),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        assert_eq!(
            hex_topic(Approval::SIGNATURE_HASH),
            "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925"
        );
        assert_eq!(
            hex_topic(ApprovalForAll::SIGNATURE_HASH),
            "0x17307eab39ab6107e8899845ad3d59bd9653f200f220920489ca2b5937696c31"
        );
    }

    #[test]
    fn test_erc20_transfer_and_net_balance() {
        let logs = vec![
            log(Transfer::SIGNATURE_HASH, &[topic(ALICE), topic(BOB)], &word(100)),
            log(Transfer::SIGNATURE_HASH, &[topic(BOB), topic(ALICE)], &word(30)),
        ];
        let events = process_event_logs(&logs);

        assert_eq!(events.transfer_erc20.len(), 2);
        assert_eq!(events.transfer_erc20[0].from, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(events.transfer_erc20[0].amount, "100");

        let alice = &events.user_token_balance["0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"];
        let bob = &events.user_token_balance["0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"];
        assert_eq!(alice[TOKEN], "-70");
        assert_eq!(bob[TOKEN], "70");
    }

    #[test]
    fn test_erc721_transfer_token_id_formats() {
        let hashed = "0xffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff01";
        let logs = vec![
            log(Transfer::SIGNATURE_HASH, &[topic(ALICE), topic(BOB), word(42)], "0x"),
            log(Transfer::SIGNATURE_HASH, &[topic(ALICE), topic(BOB), hashed.into()], "0x"),
        ];
        let events = process_event_logs(&logs);
        assert_eq!(events.transfer_erc721[0].token_id, "42");
        assert_eq!(events.transfer_erc721[1].token_id, hashed);
        assert!(events.user_token_balance.is_empty());
    }

    #[test]
    fn test_erc20_approval_infinite_threshold() {
        let max = format!("0x{}", "f".repeat(64));
        let below = format!("0x3{}", "f".repeat(63));
        let logs = vec![
            log(Approval::SIGNATURE_HASH, &[topic(ALICE), topic(BOB)], &max),
            log(Approval::SIGNATURE_HASH, &[topic(ALICE), topic(BOB)], &below),
            log(Approval::SIGNATURE_HASH, &[topic(ALICE), topic(BOB)], &word(5)),
        ];
        let events = process_event_logs(&logs);
        assert_eq!(events.approval_erc20[0].amount, "infinite");
        assert_ne!(events.approval_erc20[1].amount, "infinite");
        assert_eq!(events.approval_erc20[2].amount, "5");
        assert_eq!(events.approval_erc20[2].spender, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
    }

    #[test]
    fn test_erc721_approval() {
        let logs = vec![log(
            Approval::SIGNATURE_HASH,
            &[topic(ALICE), topic(BOB), word(7)],
            "0x",
        )];
        let events = process_event_logs(&logs);
        assert_eq!(events.approval_erc721.len(), 1);
        assert_eq!(events.approval_erc721[0].token_id, "7");
    }

    #[test]
    fn test_approval_for_all_yes_no() {
        let logs = vec![
            log(ApprovalForAll::SIGNATURE_HASH, &[topic(ALICE), topic(BOB)], &word(1)),
            log(ApprovalForAll::SIGNATURE_HASH, &[topic(ALICE), topic(BOB)], FALSE_WORD),
        ];
        let events = process_event_logs(&logs);
        assert_eq!(events.approval_for_all[0].approved, "YES");
        assert_eq!(events.approval_for_all[1].approved, "NO");
        assert_eq!(events.approval_for_all[0].operator, "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
    }

    #[test]
    fn test_unrecognised_logs_are_skipped() {
        let logs = vec![
            Log::default(),
            log(B256::ZERO, &[topic(ALICE)], "0x"),
            log(Transfer::SIGNATURE_HASH, &[topic(ALICE)], "0x"),
        ];
        assert_eq!(process_event_logs(&logs), ProcessedEvents::default());
    }

    #[test]
    fn test_serialized_keys() {
        let json = serde_json::to_value(ProcessedEvents::default()).unwrap();
        for key in [
            "approvalERC20Events",
            "approvalERC721Events",
            "approvalForAllEvents",
            "transferERC20Events",
            "transferERC721Events",
            "userTokenBalance",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_decode_trace_from_last_log() {
        let trace = r#"{"calls":[]}"#;
        let logs = vec![
            Log::default(),
            Log {
                data: format!("0x{}", hex::encode(trace)),
                ..Default::default()
            },
        ];
        assert_eq!(decode_trace(&logs), Some(serde_json::json!({"calls": []})));
        assert_eq!(decode_trace(&logs[..1]), None);
        assert_eq!(decode_trace(&[]), None);
    }
}
