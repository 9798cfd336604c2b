//! Operator approval handler
//!
//! Approvals grant an operator headroom (rate and lockup allowances) over a
//! client's funds for one token. Updates overwrite the allowances but never
//! touch the usage counters, which only move with rail activity.

use crate::entities::OperatorApproval;
use crate::events::{BlockContext, EventPayload};
use crate::metrics::effects::MetricEffect;
use crate::store::{Store, StoreError};

use super::{load_or_create_account, load_or_create_operator, load_or_create_operator_token};

pub fn handle_approval_updated(
    store: &Store,
    payload: &EventPayload,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let EventPayload::OperatorApprovalUpdated {
        client,
        operator,
        token,
        rate_allowance,
        lockup_allowance,
        max_lockup_period,
        is_approved,
    } = payload
    else {
        return Ok(Vec::new());
    };

    let (mut client_account, _) = load_or_create_account(store, client, ctx)?;
    let (mut operator_entity, operator_is_new) = load_or_create_operator(store, operator, ctx)?;

    let existing = store.get_operator_approval(client, operator, token)?;
    let approval_is_new = existing.is_none();

    let mut approval =
        existing.unwrap_or_else(|| OperatorApproval::new(client, operator, token));
    approval.rate_allowance = rate_allowance.clone();
    approval.lockup_allowance = lockup_allowance.clone();
    approval.max_lockup_period = *max_lockup_period;
    approval.is_approved = *is_approved;
    store.put_operator_approval(&approval)?;

    if approval_is_new {
        client_account.total_approvals += 1;
        operator_entity.total_approvals += 1;
    }
    store.put_account(&client_account)?;
    store.put_operator(&operator_entity)?;

    // Make sure the per-token operator row exists before any rail touches it
    let (operator_token, token_row_is_new) = load_or_create_operator_token(store, operator, token)?;
    if token_row_is_new {
        store.put_operator_token(&operator_token)?;
    }

    Ok(vec![MetricEffect::OperatorApproval {
        operator: operator.clone(),
        approval_is_new,
        operator_is_new,
    }])
}
