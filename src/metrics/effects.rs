//! Metric effects emitted by event handlers
//!
//! A handler's entity mutations and its aggregate fan-out are decoupled: the
//! handler returns a list of effects, and `collectors::apply_effect` turns
//! each one into the aggregate writes for its scopes. "First-ever" facts are
//! derived at event time by comparing counters to zero, never from stored
//! boolean flags, so they stay correct under replay from genesis.

use crate::amount::Amount;
use crate::entities::RailState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityDirection {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone)]
pub enum MetricEffect {
    RailCreated {
        payer: String,
        payee: String,
        operator: String,
        token: String,
        /// Accounts created by this very event (first-ever touch).
        payer_is_new_account: bool,
        payee_is_new_account: bool,
        operator_is_new: bool,
        /// First rail ever touching the account as payer / payee.
        payer_first_rail: bool,
        payee_first_rail: bool,
    },
    Settlement {
        token: String,
        operator: String,
        total_settled: Amount,
        net_payee: Amount,
        commission: Amount,
        network_fee: Amount,
    },
    RailStateChanged {
        from: RailState,
        to: RailState,
    },
    TokenActivity {
        token: String,
        account: String,
        direction: ActivityDirection,
        amount: Amount,
        account_is_new: bool,
        holder_is_new: bool,
        token_is_new: bool,
    },
    OperatorApproval {
        operator: String,
        approval_is_new: bool,
        operator_is_new: bool,
    },
    OneTimePayment {
        network_fee: Amount,
    },
}
