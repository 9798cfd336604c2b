//! Aggregate metric rows
//!
//! One struct per aggregate table. Each is lazily created with all counters
//! zeroed on the first write within its bucket; the collectors load-or-init,
//! mutate, and save. All derive `Serialize` (amounts as base-10 strings) so
//! the query surface can hand them straight to the API layer.

use serde::Serialize;

use crate::amount::{self, Amount};
use crate::metrics::buckets;

#[derive(Debug, Clone, Serialize)]
pub struct DailyMetric {
    pub day_start: u64,
    pub date: String,
    pub rails_created: i64,
    pub active_rails_count: i64,
    pub rails_terminated: i64,
    pub rails_finalized: i64,
    pub total_rail_settlements: i64,
    #[serde(with = "amount::serde_string")]
    pub fil_burned: Amount,
    pub new_accounts: i64,
    pub new_payers: i64,
    pub new_payees: i64,
    pub new_operators: i64,
}

impl DailyMetric {
    pub fn new(day_start: u64) -> Self {
        Self {
            day_start,
            date: buckets::date_string(day_start),
            rails_created: 0,
            active_rails_count: 0,
            rails_terminated: 0,
            rails_finalized: 0,
            total_rail_settlements: 0,
            fil_burned: amount::zero(),
            new_accounts: 0,
            new_payers: 0,
            new_payees: 0,
            new_operators: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyMetric {
    pub week_start: u64,
    pub week_end: u64,
    pub week_number: u64,
    pub rails_created: i64,
    pub active_rails_count: i64,
    pub rails_terminated: i64,
    pub rails_finalized: i64,
    pub total_rail_settlements: i64,
    #[serde(with = "amount::serde_string")]
    pub fil_burned: Amount,
    pub unique_active_payers: i64,
    pub unique_active_payees: i64,
    pub new_payers: i64,
    pub new_payees: i64,
    pub new_operators: i64,
}

impl WeeklyMetric {
    pub fn new(week_start: u64) -> Self {
        Self {
            week_start,
            week_end: buckets::week_end(week_start),
            week_number: buckets::week_number(week_start),
            rails_created: 0,
            active_rails_count: 0,
            rails_terminated: 0,
            rails_finalized: 0,
            total_rail_settlements: 0,
            fil_burned: amount::zero(),
            unique_active_payers: 0,
            unique_active_payees: 0,
            new_payers: 0,
            new_payees: 0,
            new_operators: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyTokenMetric {
    pub day_start: u64,
    pub token: String,
    pub date: String,
    #[serde(with = "amount::serde_string")]
    pub volume: Amount,
    #[serde(with = "amount::serde_string")]
    pub deposit: Amount,
    #[serde(with = "amount::serde_string")]
    pub withdrawal: Amount,
    #[serde(with = "amount::serde_string")]
    pub settled_amount: Amount,
    #[serde(with = "amount::serde_string")]
    pub commission_paid: Amount,
    pub active_rails_count: i64,
    pub unique_holders: i64,
}

impl DailyTokenMetric {
    pub fn new(day_start: u64, token: &str) -> Self {
        Self {
            day_start,
            token: token.to_string(),
            date: buckets::date_string(day_start),
            volume: amount::zero(),
            deposit: amount::zero(),
            withdrawal: amount::zero(),
            settled_amount: amount::zero(),
            commission_paid: amount::zero(),
            active_rails_count: 0,
            unique_holders: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyTokenMetric {
    pub week_start: u64,
    pub week_end: u64,
    pub token: String,
    #[serde(with = "amount::serde_string")]
    pub volume: Amount,
    #[serde(with = "amount::serde_string")]
    pub deposit: Amount,
    #[serde(with = "amount::serde_string")]
    pub withdrawal: Amount,
    #[serde(with = "amount::serde_string")]
    pub settled_amount: Amount,
    #[serde(with = "amount::serde_string")]
    pub commission_paid: Amount,
    pub active_rails_count: i64,
    pub unique_holders: i64,
}

impl WeeklyTokenMetric {
    pub fn new(week_start: u64, token: &str) -> Self {
        Self {
            week_start,
            week_end: buckets::week_end(week_start),
            token: token.to_string(),
            volume: amount::zero(),
            deposit: amount::zero(),
            withdrawal: amount::zero(),
            settled_amount: amount::zero(),
            commission_paid: amount::zero(),
            active_rails_count: 0,
            unique_holders: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyOperatorMetric {
    pub day_start: u64,
    pub operator: String,
    pub date: String,
    pub rails_created: i64,
    /// New client relationships: +1 per brand-new payer and per brand-new
    /// payee, so one rail can count twice on purpose.
    pub unique_clients: i64,
    pub settlements_processed: i64,
    pub total_approvals: i64,
}

impl DailyOperatorMetric {
    pub fn new(day_start: u64, operator: &str) -> Self {
        Self {
            day_start,
            operator: operator.to_string(),
            date: buckets::date_string(day_start),
            rails_created: 0,
            unique_clients: 0,
            settlements_processed: 0,
            total_approvals: 0,
        }
    }
}

/// Network-wide lifetime totals: a single well-known row (id 0) loaded and
/// saved through the store like any other entity, never a process-wide global.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkTotals {
    pub total_rails: i64,
    pub total_active_rails: i64,
    pub total_zero_rate_rails: i64,
    pub total_terminated_rails: i64,
    pub total_finalized_rails: i64,
    pub total_accounts: i64,
    pub total_tokens: i64,
    pub total_operators: i64,
    pub unique_payers: i64,
    pub unique_payees: i64,
    #[serde(with = "amount::serde_string")]
    pub total_fil_burned: Amount,
}

impl Default for NetworkTotals {
    fn default() -> Self {
        Self {
            total_rails: 0,
            total_active_rails: 0,
            total_zero_rate_rails: 0,
            total_terminated_rails: 0,
            total_finalized_rails: 0,
            total_accounts: 0,
            total_tokens: 0,
            total_operators: 0,
            unique_payers: 0,
            unique_payees: 0,
            total_fil_burned: amount::zero(),
        }
    }
}
