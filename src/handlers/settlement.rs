//! Settlement handlers: rate-based rail settlements and one-time payments
//!
//! Both paths move value between payer and payee balances. Settlements are
//! recorded immutably keyed by (transaction hash, log index) so a replayed
//! event never double-counts.

use crate::amount::sub_clamped;
use crate::entities::Settlement;
use crate::events::{rail_id_key, BlockContext, EventPayload};
use crate::metrics::effects::MetricEffect;
use crate::store::{Store, StoreError};

use super::load_or_create_user_token;

pub fn handle_settled(
    store: &Store,
    payload: &EventPayload,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let EventPayload::RailSettled {
        rail_id,
        total_settled_amount,
        total_net_payee_amount,
        operator_commission,
        network_fee,
        settled_upto,
    } = payload
    else {
        return Ok(Vec::new());
    };

    let key = rail_id_key(*rail_id);
    let Some(mut rail) = store.get_rail(&key)? else {
        log::warn!(
            "settlement at block {} for unknown rail {}, skipping",
            ctx.block_number,
            rail_id
        );
        return Ok(Vec::new());
    };

    rail.total_settled_amount += total_settled_amount;
    rail.total_net_payee_amount += total_net_payee_amount;
    rail.total_commission += operator_commission;
    rail.total_settlements += 1;
    rail.settled_upto = *settled_upto;
    store.put_rail(&rail)?;

    store.insert_settlement(&Settlement {
        transaction_hash: ctx.transaction_hash.clone(),
        log_index: ctx.log_index,
        rail_id: rail.id.clone(),
        total_settled_amount: total_settled_amount.clone(),
        total_net_payee_amount: total_net_payee_amount.clone(),
        operator_commission: operator_commission.clone(),
        network_fee: network_fee.clone(),
        settled_upto: *settled_upto,
        block_number: ctx.block_number,
        timestamp: ctx.block_timestamp,
    })?;

    // Payer pays the gross amount, payee receives the net. The difference,
    // commission plus fee, exits user-fund accounting below.
    let (mut payer_funds, _) = load_or_create_user_token(store, &rail.payer, &rail.token)?;
    payer_funds.funds -= total_settled_amount;
    payer_funds.payout += total_settled_amount;
    payer_funds.lockup_last_settled_until_epoch = *settled_upto;
    payer_funds.lockup_last_settled_at = ctx.block_timestamp;
    store.put_user_token(&payer_funds)?;

    let (mut payee_funds, _) = load_or_create_user_token(store, &rail.payee, &rail.token)?;
    payee_funds.funds += total_net_payee_amount;
    payee_funds.funds_collected += total_net_payee_amount;
    store.put_user_token(&payee_funds)?;

    match store.get_token(&rail.token)? {
        Some(mut token) => {
            token.user_funds -= operator_commission;
            token.total_settled_amount += total_settled_amount;
            store.put_token(&token)?;
        }
        None => {
            log::warn!("settlement on rail {} for unknown token {}", rail_id, rail.token);
        }
    }

    let (mut operator_token, _) =
        super::load_or_create_operator_token(store, &rail.operator, &rail.token)?;
    operator_token.settled_amount += total_settled_amount;
    operator_token.volume += total_settled_amount;
    operator_token.commission_earned += operator_commission;
    store.put_operator_token(&operator_token)?;

    Ok(vec![MetricEffect::Settlement {
        token: rail.token.clone(),
        operator: rail.operator.clone(),
        total_settled: total_settled_amount.clone(),
        net_payee: total_net_payee_amount.clone(),
        commission: operator_commission.clone(),
        network_fee: network_fee.clone(),
    }])
}

pub fn handle_one_time_payment(
    store: &Store,
    payload: &EventPayload,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let EventPayload::RailOneTimePayment {
        rail_id,
        net_payee_amount,
        operator_commission,
        network_fee,
    } = payload
    else {
        return Ok(Vec::new());
    };

    let key = rail_id_key(*rail_id);
    let Some(mut rail) = store.get_rail(&key)? else {
        log::warn!(
            "one-time payment at block {} for unknown rail {}, skipping",
            ctx.block_number,
            rail_id
        );
        return Ok(Vec::new());
    };

    let total_moved = net_payee_amount + operator_commission + network_fee;

    // A one-time draw spends fixed lockup, never the accruing rate.
    rail.lockup_fixed = sub_clamped(&rail.lockup_fixed, net_payee_amount);
    store.put_rail(&rail)?;

    let (mut payer_funds, _) = load_or_create_user_token(store, &rail.payer, &rail.token)?;
    payer_funds.funds -= &total_moved;
    payer_funds.payout += &total_moved;
    store.put_user_token(&payer_funds)?;

    let (mut payee_funds, _) = load_or_create_user_token(store, &rail.payee, &rail.token)?;
    payee_funds.funds += net_payee_amount;
    payee_funds.funds_collected += net_payee_amount;
    store.put_user_token(&payee_funds)?;

    // The network fee goes to the configured service-fee recipient when the
    // rail names one; otherwise it exits user-fund accounting with the
    // commission.
    let fee_stays_in_user_funds = !rail.service_fee_recipient.is_empty();
    if fee_stays_in_user_funds {
        let (mut fee_funds, _) =
            load_or_create_user_token(store, &rail.service_fee_recipient, &rail.token)?;
        fee_funds.funds += network_fee;
        fee_funds.funds_collected += network_fee;
        store.put_user_token(&fee_funds)?;
    }

    match store.get_token(&rail.token)? {
        Some(mut token) => {
            token.user_funds -= operator_commission;
            if !fee_stays_in_user_funds {
                token.user_funds -= network_fee;
            }
            store.put_token(&token)?;
        }
        None => {
            log::warn!("one-time payment on rail {} for unknown token {}", rail_id, rail.token);
        }
    }

    match store.get_operator_approval(&rail.payer, &rail.operator, &rail.token)? {
        Some(mut approval) => {
            approval.lockup_allowance = sub_clamped(&approval.lockup_allowance, &total_moved);
            approval.lockup_usage = sub_clamped(&approval.lockup_usage, &total_moved);
            store.put_operator_approval(&approval)?;
        }
        None => {
            log::warn!(
                "one-time payment on rail {} with no approval for ({}, {}, {})",
                rail_id,
                rail.payer,
                rail.operator,
                rail.token
            );
        }
    }

    let (mut operator_token, _) =
        super::load_or_create_operator_token(store, &rail.operator, &rail.token)?;
    operator_token.volume += &total_moved;
    operator_token.commission_earned += operator_commission;
    store.put_operator_token(&operator_token)?;

    Ok(vec![MetricEffect::OneTimePayment {
        network_fee: network_fee.clone(),
    }])
}
