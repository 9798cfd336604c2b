//! Decoded chain events consumed by the indexer
//!
//! The upstream ingestion layer delivers one JSONL line per contract event,
//! already deduplicated and ordered by (block, log index). The core treats
//! that contract as given: it never reorders and never dedupes, so duplicate
//! delivery would double-count.

use crate::amount::{self, Amount};
use serde::{Deserialize, Serialize};

/// Block-level context attached to every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockContext {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: String,
    pub log_index: u32,
}

/// One decoded contract event plus its block context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: String,
    pub log_index: u32,
    pub event: EventPayload,
}

impl EventEnvelope {
    pub fn context(&self) -> BlockContext {
        BlockContext {
            block_number: self.block_number,
            block_timestamp: self.block_timestamp,
            transaction_hash: self.transaction_hash.clone(),
            log_index: self.log_index,
        }
    }
}

/// Decoded event payloads, one variant per contract event type.
///
/// Addresses are lowercase hex strings, amounts are base-10 wei strings on
/// the wire (see `amount::serde_string`), rail ids are the raw on-chain u64.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Deposit {
        token: String,
        account: String,
        #[serde(with = "amount::serde_string")]
        amount: Amount,
    },
    Withdraw {
        token: String,
        account: String,
        #[serde(with = "amount::serde_string")]
        amount: Amount,
    },
    RailCreated {
        rail_id: u64,
        payer: String,
        payee: String,
        operator: String,
        token: String,
        arbiter: String,
        service_fee_recipient: String,
        commission_rate_bps: u64,
    },
    RailRateModified {
        rail_id: u64,
        #[serde(with = "amount::serde_string")]
        old_rate: Amount,
        #[serde(with = "amount::serde_string")]
        new_rate: Amount,
    },
    RailLockupModified {
        rail_id: u64,
        old_lockup_period: u64,
        new_lockup_period: u64,
        #[serde(with = "amount::serde_string")]
        old_lockup_fixed: Amount,
        #[serde(with = "amount::serde_string")]
        new_lockup_fixed: Amount,
    },
    RailTerminated {
        rail_id: u64,
        by: String,
        end_epoch: u64,
    },
    RailFinalized {
        rail_id: u64,
    },
    RailSettled {
        rail_id: u64,
        #[serde(with = "amount::serde_string")]
        total_settled_amount: Amount,
        #[serde(with = "amount::serde_string")]
        total_net_payee_amount: Amount,
        #[serde(with = "amount::serde_string")]
        operator_commission: Amount,
        #[serde(with = "amount::serde_string")]
        network_fee: Amount,
        settled_upto: u64,
    },
    RailOneTimePayment {
        rail_id: u64,
        #[serde(with = "amount::serde_string")]
        net_payee_amount: Amount,
        #[serde(with = "amount::serde_string")]
        operator_commission: Amount,
        #[serde(with = "amount::serde_string")]
        network_fee: Amount,
    },
    OperatorApprovalUpdated {
        client: String,
        operator: String,
        token: String,
        #[serde(with = "amount::serde_string")]
        rate_allowance: Amount,
        #[serde(with = "amount::serde_string")]
        lockup_allowance: Amount,
        max_lockup_period: u64,
        is_approved: bool,
    },
}

/// Storage key for a rail: the on-chain id encoded as fixed-width hex bytes.
///
/// Fixed-width encoding keeps lexicographic ordering consistent with numeric
/// ordering, so range scans over rails behave.
pub fn rail_id_key(rail_id: u64) -> String {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&rail_id.to_be_bytes());
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount;

    #[test]
    fn test_rail_id_key_fixed_width() {
        let key = rail_id_key(7);
        assert_eq!(key.len(), 2 + 64);
        assert!(key.ends_with("07"));
        // Numeric order preserved lexicographically
        assert!(rail_id_key(9) < rail_id_key(10));
    }

    #[test]
    fn test_event_json_round_trip() {
        let line = r#"{
            "block_number": 120,
            "block_timestamp": 1704585600,
            "transaction_hash": "0xabc",
            "log_index": 3,
            "event": {
                "kind": "rail_settled",
                "rail_id": 1,
                "total_settled_amount": "500",
                "total_net_payee_amount": "450",
                "operator_commission": "50",
                "network_fee": "10",
                "settled_upto": 118
            }
        }"#;

        let envelope: EventEnvelope = serde_json::from_str(line).unwrap();
        assert_eq!(envelope.block_number, 120);
        match &envelope.event {
            EventPayload::RailSettled {
                total_settled_amount,
                network_fee,
                ..
            } => {
                assert_eq!(*total_settled_amount, amount::from_text("500").unwrap());
                assert_eq!(*network_fee, amount::from_text("10").unwrap());
            }
            other => panic!("unexpected payload: {:?}", other),
        }

        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.transaction_hash, "0xabc");
    }
}
