//! Rail state machine: one transition function per chain-event type
//!
//! Each handler reads/creates the affected entities, applies the event's
//! balance and state deltas, and returns the metric effects for the
//! aggregation engine. Handlers never crash on a missing referenced entity:
//! they log at warning level and return no effects. They are NOT idempotent
//! against duplicate delivery; the feed contract is at-most-once, in-order.

mod approvals;
mod funds;
mod rails;
mod settlement;

use crate::entities::{Account, Operator, OperatorToken, Token, UserToken};
use crate::erc20::TokenMetadataSource;
use crate::events::{BlockContext, EventEnvelope, EventPayload};
use crate::metrics::effects::MetricEffect;
use crate::store::{Store, StoreError};

/// Dispatch one event to its handler.
pub fn apply(
    store: &Store,
    envelope: &EventEnvelope,
    metadata: &dyn TokenMetadataSource,
) -> Result<Vec<MetricEffect>, StoreError> {
    let ctx = envelope.context();
    match &envelope.event {
        EventPayload::Deposit { token, account, amount } => {
            funds::handle_deposit(store, metadata, token, account, amount, &ctx)
        }
        EventPayload::Withdraw { token, account, amount } => {
            funds::handle_withdraw(store, token, account, amount, &ctx)
        }
        EventPayload::RailCreated { .. } => rails::handle_rail_created(store, &envelope.event, &ctx),
        EventPayload::RailRateModified { rail_id, old_rate, new_rate } => {
            rails::handle_rate_modified(store, *rail_id, old_rate, new_rate, &ctx)
        }
        EventPayload::RailLockupModified {
            rail_id,
            new_lockup_period,
            new_lockup_fixed,
            ..
        } => rails::handle_lockup_modified(store, *rail_id, *new_lockup_period, new_lockup_fixed, &ctx),
        EventPayload::RailTerminated { rail_id, end_epoch, .. } => {
            rails::handle_terminated(store, *rail_id, *end_epoch, &ctx)
        }
        EventPayload::RailFinalized { rail_id } => rails::handle_finalized(store, *rail_id, &ctx),
        EventPayload::RailSettled { .. } => settlement::handle_settled(store, &envelope.event, &ctx),
        EventPayload::RailOneTimePayment { .. } => {
            settlement::handle_one_time_payment(store, &envelope.event, &ctx)
        }
        EventPayload::OperatorApprovalUpdated { .. } => {
            approvals::handle_approval_updated(store, &envelope.event, &ctx)
        }
    }
}

/// Load an account or create it zeroed. Returns (account, created_now).
pub(crate) fn load_or_create_account(
    store: &Store,
    address: &str,
    ctx: &BlockContext,
) -> Result<(Account, bool), StoreError> {
    match store.get_account(address)? {
        Some(account) => Ok((account, false)),
        None => Ok((Account::new(address, ctx.block_timestamp), true)),
    }
}

/// Load a token or create it from ERC20 metadata. Metadata lookup failure is
/// never fatal: missing fields fall back to "Unknown" / "UNKNOWN" / 18.
pub(crate) fn load_or_create_token(
    store: &Store,
    metadata: &dyn TokenMetadataSource,
    address: &str,
    ctx: &BlockContext,
) -> Result<(Token, bool), StoreError> {
    match store.get_token(address)? {
        Some(token) => Ok((token, false)),
        None => {
            let meta = metadata.fetch_or_default(address);
            Ok((
                Token::new(address, &meta.name, &meta.symbol, meta.decimals, ctx.block_timestamp),
                true,
            ))
        }
    }
}

pub(crate) fn load_or_create_user_token(
    store: &Store,
    account: &str,
    token: &str,
) -> Result<(UserToken, bool), StoreError> {
    match store.get_user_token(account, token)? {
        Some(ut) => Ok((ut, false)),
        None => Ok((UserToken::new(account, token), true)),
    }
}

pub(crate) fn load_or_create_operator(
    store: &Store,
    address: &str,
    ctx: &BlockContext,
) -> Result<(Operator, bool), StoreError> {
    match store.get_operator(address)? {
        Some(operator) => Ok((operator, false)),
        None => Ok((Operator::new(address, ctx.block_timestamp), true)),
    }
}

pub(crate) fn load_or_create_operator_token(
    store: &Store,
    operator: &str,
    token: &str,
) -> Result<(OperatorToken, bool), StoreError> {
    match store.get_operator_token(operator, token)? {
        Some(ot) => Ok((ot, false)),
        None => Ok((OperatorToken::new(operator, token), true)),
    }
}
