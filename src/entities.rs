//! Persistent entities reconstructed from chain events
//!
//! These map one-to-one onto SQLite rows (see `sql/01_entities.sql`). Every
//! monetary field is an `Amount`; counters are plain integers. Entities are
//! created lazily on first touch and never deleted.

use serde::Serialize;

use crate::amount::{self, Amount};

/// Rail lifecycle states.
///
/// The only legal edges are ZeroRate→Active, {Active,ZeroRate}→Terminated,
/// Terminated→Finalized. Finalized is terminal. Upstream represented this as
/// free-form strings; the closed enum makes every comparison exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RailState {
    #[serde(rename = "ZERORATE")]
    ZeroRate,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "TERMINATED")]
    Terminated,
    #[serde(rename = "FINALIZED")]
    Finalized,
}

impl RailState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RailState::ZeroRate => "ZERORATE",
            RailState::Active => "ACTIVE",
            RailState::Terminated => "TERMINATED",
            RailState::Finalized => "FINALIZED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ZERORATE" => Some(RailState::ZeroRate),
            "ACTIVE" => Some(RailState::Active),
            "TERMINATED" => Some(RailState::Terminated),
            "FINALIZED" => Some(RailState::Finalized),
            _ => None,
        }
    }

    /// A rail still reserves future lockup only while not terminated.
    pub fn is_live(&self) -> bool {
        matches!(self, RailState::ZeroRate | RailState::Active)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub address: String,
    /// Count of rails where this account is payer or payee, bumped once per
    /// rail creation touching it.
    pub total_rails: i64,
    pub total_approvals: i64,
    pub total_tokens: i64,
    pub created_at: u64,
}

impl Account {
    pub fn new(address: &str, created_at: u64) -> Self {
        Self {
            address: address.to_string(),
            total_rails: 0,
            total_approvals: 0,
            total_tokens: 0,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Token {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    #[serde(with = "amount::serde_string")]
    pub volume: Amount,
    #[serde(with = "amount::serde_string")]
    pub total_deposits: Amount,
    #[serde(with = "amount::serde_string")]
    pub total_withdrawals: Amount,
    #[serde(with = "amount::serde_string")]
    pub total_settled_amount: Amount,
    /// Net funds held across all users. Signed: operator commission exits
    /// user-fund accounting on settlement and ordering slop is tolerated.
    #[serde(with = "amount::serde_string")]
    pub user_funds: Amount,
    pub total_users: i64,
    pub created_at: u64,
}

impl Token {
    pub fn new(address: &str, name: &str, symbol: &str, decimals: u32, created_at: u64) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            symbol: symbol.to_string(),
            decimals,
            volume: amount::zero(),
            total_deposits: amount::zero(),
            total_withdrawals: amount::zero(),
            total_settled_amount: amount::zero(),
            user_funds: amount::zero(),
            total_users: 0,
            created_at,
        }
    }
}

/// Per-(account, token) balance book.
#[derive(Debug, Clone, Serialize)]
pub struct UserToken {
    pub account: String,
    pub token: String,
    /// Withdrawable balance. Expected non-negative, but settlement timing can
    /// briefly push it below zero and the engine must absorb that.
    #[serde(with = "amount::serde_string")]
    pub funds: Amount,
    #[serde(with = "amount::serde_string")]
    pub lockup_current: Amount,
    /// Wei per epoch currently being locked across this payer's live rails.
    #[serde(with = "amount::serde_string")]
    pub lockup_rate: Amount,
    pub lockup_last_settled_until_epoch: u64,
    pub lockup_last_settled_at: u64,
    /// Cumulative amount paid out as payer.
    #[serde(with = "amount::serde_string")]
    pub payout: Amount,
    /// Cumulative amount received as payee.
    #[serde(with = "amount::serde_string")]
    pub funds_collected: Amount,
}

impl UserToken {
    pub fn new(account: &str, token: &str) -> Self {
        Self {
            account: account.to_string(),
            token: token.to_string(),
            funds: amount::zero(),
            lockup_current: amount::zero(),
            lockup_rate: amount::zero(),
            lockup_last_settled_until_epoch: 0,
            lockup_last_settled_at: 0,
            payout: amount::zero(),
            funds_collected: amount::zero(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Operator {
    pub address: String,
    pub total_rails: i64,
    pub total_approvals: i64,
    pub created_at: u64,
}

impl Operator {
    pub fn new(address: &str, created_at: u64) -> Self {
        Self {
            address: address.to_string(),
            total_rails: 0,
            total_approvals: 0,
            created_at,
        }
    }
}

/// Per-(operator, token) lifetime settlement counters.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorToken {
    pub operator: String,
    pub token: String,
    #[serde(with = "amount::serde_string")]
    pub settled_amount: Amount,
    #[serde(with = "amount::serde_string")]
    pub volume: Amount,
    #[serde(with = "amount::serde_string")]
    pub commission_earned: Amount,
    pub total_rails: i64,
}

impl OperatorToken {
    pub fn new(operator: &str, token: &str) -> Self {
        Self {
            operator: operator.to_string(),
            token: token.to_string(),
            settled_amount: amount::zero(),
            volume: amount::zero(),
            commission_earned: amount::zero(),
            total_rails: 0,
        }
    }
}

/// Permission envelope a client grants an operator per token.
///
/// Usage fields are running counters with a hard floor at zero: a subtraction
/// that would underflow clamps instead (see `amount::sub_clamped`).
#[derive(Debug, Clone, Serialize)]
pub struct OperatorApproval {
    pub client: String,
    pub operator: String,
    pub token: String,
    #[serde(with = "amount::serde_string")]
    pub lockup_allowance: Amount,
    #[serde(with = "amount::serde_string")]
    pub lockup_usage: Amount,
    #[serde(with = "amount::serde_string")]
    pub rate_allowance: Amount,
    #[serde(with = "amount::serde_string")]
    pub rate_usage: Amount,
    pub max_lockup_period: u64,
    pub is_approved: bool,
}

impl OperatorApproval {
    pub fn new(client: &str, operator: &str, token: &str) -> Self {
        Self {
            client: client.to_string(),
            operator: operator.to_string(),
            token: token.to_string(),
            lockup_allowance: amount::zero(),
            lockup_usage: amount::zero(),
            rate_allowance: amount::zero(),
            rate_usage: amount::zero(),
            max_lockup_period: 0,
            is_approved: false,
        }
    }
}

/// The core state-machine entity: a unidirectional rate-based payment channel.
#[derive(Debug, Clone, Serialize)]
pub struct Rail {
    /// Fixed-width hex storage key (see `events::rail_id_key`).
    pub id: String,
    pub rail_id: u64,
    pub payer: String,
    pub payee: String,
    pub operator: String,
    pub token: String,
    pub arbiter: String,
    pub service_fee_recipient: String,
    pub commission_rate_bps: u64,
    #[serde(with = "amount::serde_string")]
    pub payment_rate: Amount,
    #[serde(with = "amount::serde_string")]
    pub lockup_fixed: Amount,
    pub lockup_period: u64,
    /// Last settled epoch.
    pub settled_upto: u64,
    pub state: RailState,
    /// Frozen on termination; zero while live.
    pub end_epoch: u64,
    #[serde(with = "amount::serde_string")]
    pub total_settled_amount: Amount,
    #[serde(with = "amount::serde_string")]
    pub total_net_payee_amount: Amount,
    #[serde(with = "amount::serde_string")]
    pub total_commission: Amount,
    pub total_settlements: i64,
    pub total_rate_changes: i64,
    pub created_at: u64,
}

impl Rail {
    /// Remaining lockup a live rail reserves against its operator's
    /// allowance. Terminated rails reserve the fixed part only.
    pub fn reserved_lockup(&self) -> Amount {
        if self.state.is_live() {
            &self.lockup_fixed + &self.payment_rate * self.lockup_period
        } else {
            self.lockup_fixed.clone()
        }
    }
}

/// Immutable record of a single settlement call, keyed (tx hash, log index).
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub transaction_hash: String,
    pub log_index: u32,
    pub rail_id: String,
    #[serde(with = "amount::serde_string")]
    pub total_settled_amount: Amount,
    #[serde(with = "amount::serde_string")]
    pub total_net_payee_amount: Amount,
    #[serde(with = "amount::serde_string")]
    pub operator_commission: Amount,
    #[serde(with = "amount::serde_string")]
    pub network_fee: Amount,
    pub settled_upto: u64,
    pub block_number: u64,
    pub timestamp: u64,
}

/// Historical rate segment, keyed (rail, start epoch). Append-only.
///
/// Recorded when a rail's rate changes while an unsettled span crosses the
/// change, so later settlements can reconstruct exact per-segment amounts.
#[derive(Debug, Clone, Serialize)]
pub struct RateChangeQueueEntry {
    pub rail_id: String,
    pub start_epoch: u64,
    pub until_epoch: u64,
    #[serde(with = "amount::serde_string")]
    pub rate: Amount,
}
