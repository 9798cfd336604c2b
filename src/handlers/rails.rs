//! Rail lifecycle handlers: creation, rate/lockup changes, termination,
//! finalization
//!
//! State edges are ZeroRate→Active, {Active,ZeroRate}→Terminated,
//! Terminated→Finalized. The payer's `lockup_rate` always equals the sum of
//! payment rates over their live rails; every transition here maintains that
//! equality.

use num_traits::{Signed, Zero};

use crate::amount::{sub_clamped, Amount};
use crate::entities::{Rail, RailState, RateChangeQueueEntry};
use crate::events::{rail_id_key, BlockContext, EventPayload};
use crate::metrics::effects::MetricEffect;
use crate::store::{Store, StoreError};

use super::{
    load_or_create_account, load_or_create_operator, load_or_create_operator_token,
    load_or_create_user_token,
};

pub fn handle_rail_created(
    store: &Store,
    payload: &EventPayload,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let EventPayload::RailCreated {
        rail_id,
        payer,
        payee,
        operator,
        token,
        arbiter,
        service_fee_recipient,
        commission_rate_bps,
    } = payload
    else {
        return Ok(Vec::new());
    };

    // "First rail" facts are read off the counters before they move; a payer
    // that is also its own payee still reads the updated row the second time.
    let (mut payer_account, payer_is_new) = load_or_create_account(store, payer, ctx)?;
    let payer_first_rail = payer_account.total_rails == 0;
    payer_account.total_rails += 1;
    store.put_account(&payer_account)?;

    let (mut payee_account, payee_is_new) = load_or_create_account(store, payee, ctx)?;
    let payee_first_rail = payee_account.total_rails == 0;
    payee_account.total_rails += 1;
    store.put_account(&payee_account)?;

    let (mut operator_entity, operator_is_new) = load_or_create_operator(store, operator, ctx)?;
    operator_entity.total_rails += 1;
    store.put_operator(&operator_entity)?;

    let (mut operator_token, _) = load_or_create_operator_token(store, operator, token)?;
    operator_token.total_rails += 1;
    store.put_operator_token(&operator_token)?;

    let rail = Rail {
        id: rail_id_key(*rail_id),
        rail_id: *rail_id,
        payer: payer.clone(),
        payee: payee.clone(),
        operator: operator.clone(),
        token: token.clone(),
        arbiter: arbiter.clone(),
        service_fee_recipient: service_fee_recipient.clone(),
        commission_rate_bps: *commission_rate_bps,
        payment_rate: crate::amount::zero(),
        lockup_fixed: crate::amount::zero(),
        lockup_period: 0,
        settled_upto: 0,
        state: RailState::ZeroRate,
        end_epoch: 0,
        total_settled_amount: crate::amount::zero(),
        total_net_payee_amount: crate::amount::zero(),
        total_commission: crate::amount::zero(),
        total_settlements: 0,
        total_rate_changes: 0,
        created_at: ctx.block_timestamp,
    };
    store.put_rail(&rail)?;

    Ok(vec![MetricEffect::RailCreated {
        payer: payer.clone(),
        payee: payee.clone(),
        operator: operator.clone(),
        token: token.clone(),
        payer_is_new_account: payer_is_new,
        payee_is_new_account: payee_is_new,
        operator_is_new,
        payer_first_rail,
        payee_first_rail,
    }])
}

pub fn handle_rate_modified(
    store: &Store,
    rail_id: u64,
    old_rate: &Amount,
    new_rate: &Amount,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let key = rail_id_key(rail_id);
    let Some(mut rail) = store.get_rail(&key)? else {
        log::warn!("rate modified at block {} for unknown rail {}, skipping", ctx.block_number, rail_id);
        return Ok(Vec::new());
    };

    let mut effects = Vec::new();
    let rate_changed = old_rate != new_rate;

    rail.payment_rate = new_rate.clone();
    if rate_changed {
        rail.total_rate_changes += 1;
    }

    // ZeroRate rails come alive on their first positive rate.
    if old_rate.is_zero() && new_rate.is_positive() && rail.state != RailState::Active {
        let previous = rail.state;
        rail.state = RailState::Active;
        effects.push(MetricEffect::RailStateChanged {
            from: previous,
            to: RailState::Active,
        });
    }

    // Preserve the exact historical rate segment if an unsettled span crosses
    // this change; skip when the newest entry already ends at this block.
    if rate_changed && rail.settled_upto < ctx.block_number {
        let latest = store.latest_rate_change(&rail.id)?;
        let already_recorded = latest
            .as_ref()
            .map(|entry| entry.until_epoch == ctx.block_number)
            .unwrap_or(false);
        if !already_recorded {
            let start_epoch = latest
                .map(|entry| entry.until_epoch)
                .unwrap_or(rail.settled_upto);
            store.insert_rate_change(&RateChangeQueueEntry {
                rail_id: rail.id.clone(),
                start_epoch,
                until_epoch: ctx.block_number,
                rate: old_rate.clone(),
            })?;
        }
    }

    if rate_changed {
        // Live rails reserve lockup at the payment rate: the payer's accrual
        // rate and the operator's rate usage move with the delta. A terminated
        // rail keeps its rate usage frozen, but its lockup usage still unwinds
        // over whatever span remains until end_epoch.
        if rail.state.is_live() {
            let (mut user_token, _) = load_or_create_user_token(store, &rail.payer, &rail.token)?;
            user_token.lockup_rate =
                crate::amount::clamp_non_negative(&user_token.lockup_rate - old_rate + new_rate);
            store.put_user_token(&user_token)?;
        }

        match store.get_operator_approval(&rail.payer, &rail.operator, &rail.token)? {
            Some(mut approval) => {
                if rail.state.is_live() {
                    approval.rate_usage = crate::amount::clamp_non_negative(
                        &approval.rate_usage - old_rate + new_rate,
                    );
                }
                let period = effective_lockup_period(&rail, ctx.block_number);
                approval.lockup_usage = crate::amount::clamp_non_negative(
                    &approval.lockup_usage - old_rate * period + new_rate * period,
                );
                store.put_operator_approval(&approval)?;
            }
            None => {
                log::warn!(
                    "rate modified on rail {} with no approval for ({}, {}, {})",
                    rail_id,
                    rail.payer,
                    rail.operator,
                    rail.token
                );
            }
        }
    }

    store.put_rail(&rail)?;
    Ok(effects)
}

pub fn handle_lockup_modified(
    store: &Store,
    rail_id: u64,
    new_lockup_period: u64,
    new_lockup_fixed: &Amount,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let key = rail_id_key(rail_id);
    let Some(mut rail) = store.get_rail(&key)? else {
        log::warn!("lockup modified at block {} for unknown rail {}, skipping", ctx.block_number, rail_id);
        return Ok(Vec::new());
    };

    let old_reserved = rail.reserved_lockup();

    rail.lockup_fixed = new_lockup_fixed.clone();
    if rail.state.is_live() {
        rail.lockup_period = new_lockup_period;
    }

    let new_reserved = rail.reserved_lockup();

    match store.get_operator_approval(&rail.payer, &rail.operator, &rail.token)? {
        Some(mut approval) => {
            approval.lockup_usage = crate::amount::clamp_non_negative(
                &approval.lockup_usage - &old_reserved + &new_reserved,
            );
            store.put_operator_approval(&approval)?;
        }
        None => {
            log::warn!(
                "lockup modified on rail {} with no approval for ({}, {}, {})",
                rail_id,
                rail.payer,
                rail.operator,
                rail.token
            );
        }
    }

    store.put_rail(&rail)?;
    Ok(Vec::new())
}

pub fn handle_terminated(
    store: &Store,
    rail_id: u64,
    end_epoch: u64,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let key = rail_id_key(rail_id);
    let Some(mut rail) = store.get_rail(&key)? else {
        log::warn!("termination at block {} for unknown rail {}, skipping", ctx.block_number, rail_id);
        return Ok(Vec::new());
    };

    let previous = rail.state;
    rail.state = RailState::Terminated;
    rail.end_epoch = end_epoch;

    // The rail no longer reserves future lockup: the payer's accrual rate
    // permanently drops by this rail's payment rate.
    match store.get_user_token(&rail.payer, &rail.token)? {
        Some(mut user_token) => {
            user_token.lockup_rate = sub_clamped(&user_token.lockup_rate, &rail.payment_rate);
            store.put_user_token(&user_token)?;
        }
        None => {
            log::warn!(
                "termination of rail {} with no user token for ({}, {})",
                rail_id,
                rail.payer,
                rail.token
            );
        }
    }

    store.put_rail(&rail)?;

    Ok(vec![MetricEffect::RailStateChanged {
        from: previous,
        to: RailState::Terminated,
    }])
}

pub fn handle_finalized(
    store: &Store,
    rail_id: u64,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let key = rail_id_key(rail_id);
    let Some(mut rail) = store.get_rail(&key)? else {
        log::warn!("finalization at block {} for unknown rail {}, skipping", ctx.block_number, rail_id);
        return Ok(Vec::new());
    };

    // Full remaining lockup goes back to the operator's headroom.
    let released = &rail.lockup_fixed + &rail.payment_rate * rail.lockup_period;
    match store.get_operator_approval(&rail.payer, &rail.operator, &rail.token)? {
        Some(mut approval) => {
            approval.lockup_usage = sub_clamped(&approval.lockup_usage, &released);
            store.put_operator_approval(&approval)?;
        }
        None => {
            log::warn!(
                "finalization of rail {} with no approval for ({}, {}, {})",
                rail_id,
                rail.payer,
                rail.operator,
                rail.token
            );
        }
    }

    let previous = rail.state;
    rail.state = RailState::Finalized;
    store.put_rail(&rail)?;

    // Emit the rail's actual prior state, not a fixed literal.
    Ok(vec![MetricEffect::RailStateChanged {
        from: previous,
        to: RailState::Finalized,
    }])
}

/// Epochs over which a rate delta still affects lockup usage: the full
/// lockup period while live, the remaining span until `end_epoch` once
/// terminated, zero once that span has elapsed.
fn effective_lockup_period(rail: &Rail, block_number: u64) -> u64 {
    if rail.state.is_live() {
        rail.lockup_period
    } else {
        rail.end_epoch.saturating_sub(block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{from_text, zero};
    use crate::entities::OperatorApproval;
    use crate::store::schema;
    use rusqlite::Connection;

    fn ctx_at(block_number: u64) -> BlockContext {
        BlockContext {
            block_number,
            block_timestamp: 1_704_900_600,
            transaction_hash: "0xhash".to_string(),
            log_index: 0,
        }
    }

    fn open_store_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();
        conn
    }

    fn created_payload(rail_id: u64) -> EventPayload {
        EventPayload::RailCreated {
            rail_id,
            payer: "0xpayer".to_string(),
            payee: "0xpayee".to_string(),
            operator: "0xop".to_string(),
            token: "0xtok".to_string(),
            arbiter: "0xarb".to_string(),
            service_fee_recipient: String::new(),
            commission_rate_bps: 100,
        }
    }

    fn seed_approval(store: &Store, rate_usage: &str, lockup_usage: &str) {
        let mut approval = OperatorApproval::new("0xpayer", "0xop", "0xtok");
        approval.rate_usage = from_text(rate_usage).unwrap();
        approval.lockup_usage = from_text(lockup_usage).unwrap();
        approval.is_approved = true;
        store.put_operator_approval(&approval).unwrap();
    }

    #[test]
    fn test_rail_created_starts_zero_rate() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        let effects = handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();

        let rail = store.get_rail(&rail_id_key(1)).unwrap().unwrap();
        assert_eq!(rail.state, RailState::ZeroRate);
        assert_eq!(rail.payment_rate, zero());

        let payer = store.get_account("0xpayer").unwrap().unwrap();
        assert_eq!(payer.total_rails, 1);
        let operator = store.get_operator("0xop").unwrap().unwrap();
        assert_eq!(operator.total_rails, 1);

        match &effects[0] {
            MetricEffect::RailCreated {
                payer_first_rail,
                payee_first_rail,
                operator_is_new,
                ..
            } => {
                assert!(*payer_first_rail && *payee_first_rail && *operator_is_new);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn test_second_rail_is_not_first() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        let effects = handle_rail_created(&store, &created_payload(2), &ctx_at(11)).unwrap();

        match &effects[0] {
            MetricEffect::RailCreated {
                payer_first_rail,
                payer_is_new_account,
                ..
            } => {
                assert!(!*payer_first_rail);
                assert!(!*payer_is_new_account);
            }
            other => panic!("unexpected effect: {:?}", other),
        }
    }

    #[test]
    fn test_rate_zero_to_positive_activates_rail() {
        let conn = open_store_conn();
        let store = Store::new(&conn);
        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        seed_approval(&store, "0", "0");

        let effects = handle_rate_modified(
            &store,
            1,
            &zero(),
            &from_text("1000").unwrap(),
            &ctx_at(20),
        )
        .unwrap();

        let rail = store.get_rail(&rail_id_key(1)).unwrap().unwrap();
        assert_eq!(rail.state, RailState::Active);
        assert_eq!(rail.payment_rate, from_text("1000").unwrap());
        assert_eq!(rail.total_rate_changes, 1);

        assert!(matches!(
            effects[0],
            MetricEffect::RailStateChanged {
                from: RailState::ZeroRate,
                to: RailState::Active,
            }
        ));

        // Payer's accrual rate follows the live rail's rate
        let ut = store.get_user_token("0xpayer", "0xtok").unwrap().unwrap();
        assert_eq!(ut.lockup_rate, from_text("1000").unwrap());

        // Operator usage tracked the delta
        let approval = store
            .get_operator_approval("0xpayer", "0xop", "0xtok")
            .unwrap()
            .unwrap();
        assert_eq!(approval.rate_usage, from_text("1000").unwrap());
    }

    #[test]
    fn test_rate_modified_unknown_rail_is_noop() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        let effects =
            handle_rate_modified(&store, 99, &zero(), &from_text("5").unwrap(), &ctx_at(20)).unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn test_rate_change_records_historical_segment() {
        let conn = open_store_conn();
        let store = Store::new(&conn);
        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        seed_approval(&store, "0", "0");

        handle_rate_modified(&store, 1, &zero(), &from_text("100").unwrap(), &ctx_at(20)).unwrap();
        let first = store.latest_rate_change(&rail_id_key(1)).unwrap().unwrap();
        assert_eq!(first.start_epoch, 0);
        assert_eq!(first.until_epoch, 20);
        assert_eq!(first.rate, zero());

        // Second change in the same block must not add another entry
        handle_rate_modified(
            &store,
            1,
            &from_text("100").unwrap(),
            &from_text("200").unwrap(),
            &ctx_at(20),
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM rate_change_queue", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // A later block extends the ledger from the previous boundary
        handle_rate_modified(
            &store,
            1,
            &from_text("200").unwrap(),
            &from_text("300").unwrap(),
            &ctx_at(30),
        )
        .unwrap();
        let latest = store.latest_rate_change(&rail_id_key(1)).unwrap().unwrap();
        assert_eq!(latest.start_epoch, 20);
        assert_eq!(latest.until_epoch, 30);
        assert_eq!(latest.rate, from_text("200").unwrap());
    }

    #[test]
    fn test_termination_drops_payer_lockup_rate() {
        let conn = open_store_conn();
        let store = Store::new(&conn);
        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        seed_approval(&store, "0", "0");
        handle_rate_modified(&store, 1, &zero(), &from_text("200").unwrap(), &ctx_at(20)).unwrap();

        let effects = handle_terminated(&store, 1, 500, &ctx_at(30)).unwrap();

        let rail = store.get_rail(&rail_id_key(1)).unwrap().unwrap();
        assert_eq!(rail.state, RailState::Terminated);
        assert_eq!(rail.end_epoch, 500);

        let ut = store.get_user_token("0xpayer", "0xtok").unwrap().unwrap();
        assert_eq!(ut.lockup_rate, zero());

        assert!(matches!(
            effects[0],
            MetricEffect::RailStateChanged {
                from: RailState::Active,
                to: RailState::Terminated,
            }
        ));
    }

    #[test]
    fn test_rate_change_after_termination_unwinds_remaining_lockup() {
        let conn = open_store_conn();
        let store = Store::new(&conn);
        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        seed_approval(&store, "0", "0");
        handle_rate_modified(&store, 1, &zero(), &from_text("100").unwrap(), &ctx_at(20)).unwrap();
        handle_lockup_modified(&store, 1, 10, &zero(), &ctx_at(21)).unwrap();
        handle_terminated(&store, 1, 45, &ctx_at(30)).unwrap();

        handle_rate_modified(&store, 1, &from_text("100").unwrap(), &zero(), &ctx_at(40)).unwrap();

        let approval = store
            .get_operator_approval("0xpayer", "0xop", "0xtok")
            .unwrap()
            .unwrap();
        // Rate usage stays frozen once the rail is terminated
        assert_eq!(approval.rate_usage, from_text("100").unwrap());
        // Lockup usage drops by the old rate over the five epochs left until end_epoch
        assert_eq!(approval.lockup_usage, from_text("500").unwrap());

        // The payer's accrual rate was released at termination and must not move again
        let ut = store.get_user_token("0xpayer", "0xtok").unwrap().unwrap();
        assert_eq!(ut.lockup_rate, zero());
    }

    #[test]
    fn test_finalization_releases_lockup_and_reports_prior_state() {
        let conn = open_store_conn();
        let store = Store::new(&conn);
        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        seed_approval(&store, "0", "0");
        handle_rate_modified(&store, 1, &zero(), &from_text("10").unwrap(), &ctx_at(20)).unwrap();
        handle_lockup_modified(&store, 1, 5, &from_text("100").unwrap(), &ctx_at(21)).unwrap();
        handle_terminated(&store, 1, 500, &ctx_at(30)).unwrap();

        let effects = handle_finalized(&store, 1, &ctx_at(40)).unwrap();

        let rail = store.get_rail(&rail_id_key(1)).unwrap().unwrap();
        assert_eq!(rail.state, RailState::Finalized);

        // lockup_fixed 100 + rate 10 * period 5 released, clamped at zero
        let approval = store
            .get_operator_approval("0xpayer", "0xop", "0xtok")
            .unwrap()
            .unwrap();
        assert_eq!(approval.lockup_usage, zero());

        assert!(matches!(
            effects[0],
            MetricEffect::RailStateChanged {
                from: RailState::Terminated,
                to: RailState::Finalized,
            }
        ));
    }

    #[test]
    fn test_lockup_modified_period_frozen_after_termination() {
        let conn = open_store_conn();
        let store = Store::new(&conn);
        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        seed_approval(&store, "0", "1000");
        handle_lockup_modified(&store, 1, 5, &from_text("100").unwrap(), &ctx_at(20)).unwrap();
        handle_terminated(&store, 1, 500, &ctx_at(30)).unwrap();

        handle_lockup_modified(&store, 1, 99, &from_text("50").unwrap(), &ctx_at(40)).unwrap();

        let rail = store.get_rail(&rail_id_key(1)).unwrap().unwrap();
        assert_eq!(rail.lockup_fixed, from_text("50").unwrap());
        // Period stays frozen once terminated
        assert_eq!(rail.lockup_period, 5);
    }

    #[test]
    fn test_usage_counters_never_go_negative() {
        let conn = open_store_conn();
        let store = Store::new(&conn);
        handle_rail_created(&store, &created_payload(1), &ctx_at(10)).unwrap();
        // Usage already at zero; a rate drop would underflow without the clamp
        seed_approval(&store, "0", "0");
        handle_rate_modified(&store, 1, &zero(), &from_text("10").unwrap(), &ctx_at(20)).unwrap();

        handle_rate_modified(
            &store,
            1,
            &from_text("500").unwrap(),
            &from_text("1").unwrap(),
            &ctx_at(25),
        )
        .unwrap();

        let approval = store
            .get_operator_approval("0xpayer", "0xop", "0xtok")
            .unwrap()
            .unwrap();
        assert!(approval.rate_usage >= zero());
        assert!(approval.lockup_usage >= zero());
    }
}
