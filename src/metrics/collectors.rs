//! Effect collectors: one function per metric effect
//!
//! Each collector performs the fixed sequence of aggregate updates for its
//! effect across the daily, weekly, token, operator, and network scopes.
//! Aggregate rows are lazily created zeroed the first time a bucket is
//! touched. Running counters that are maintained by subtraction
//! (total_active_rails, total_terminated_rails, total_zero_rate_rails) are
//! clamped back to zero after every mutation; that floor is required
//! behavior, not a safety net.

use crate::entities::RailState;
use crate::metrics::aggregates::{
    DailyMetric, DailyOperatorMetric, DailyTokenMetric, WeeklyMetric, WeeklyTokenMetric,
};
use crate::metrics::buckets;
use crate::metrics::effects::{ActivityDirection, MetricEffect};
use crate::store::{Store, StoreError};

/// Fan one metric effect out into its aggregate scopes.
pub fn apply_effect(store: &Store, effect: &MetricEffect, timestamp: u64) -> Result<(), StoreError> {
    match effect {
        MetricEffect::RailCreated { .. } => collect_rail_creation(store, effect, timestamp),
        MetricEffect::Settlement { .. } => collect_settlement(store, effect, timestamp),
        MetricEffect::RailStateChanged { from, to } => {
            collect_rail_state_change(store, *from, *to, timestamp)
        }
        MetricEffect::TokenActivity { .. } => collect_token_activity(store, effect, timestamp),
        MetricEffect::OperatorApproval {
            operator,
            approval_is_new,
            operator_is_new,
        } => collect_operator_approval(store, operator, *approval_is_new, *operator_is_new, timestamp),
        MetricEffect::OneTimePayment { network_fee } => {
            let mut totals = store.get_network_totals()?;
            totals.total_fil_burned += network_fee;
            store.put_network_totals(&totals)
        }
    }
}

fn load_daily(store: &Store, timestamp: u64) -> Result<DailyMetric, StoreError> {
    let day = buckets::day_start(timestamp);
    Ok(store.get_daily_metric(day)?.unwrap_or_else(|| DailyMetric::new(day)))
}

fn load_weekly(store: &Store, timestamp: u64) -> Result<WeeklyMetric, StoreError> {
    let week = buckets::week_start(timestamp);
    Ok(store
        .get_weekly_metric(week)?
        .unwrap_or_else(|| WeeklyMetric::new(week)))
}

fn load_daily_token(store: &Store, timestamp: u64, token: &str) -> Result<DailyTokenMetric, StoreError> {
    let day = buckets::day_start(timestamp);
    Ok(store
        .get_daily_token_metric(day, token)?
        .unwrap_or_else(|| DailyTokenMetric::new(day, token)))
}

fn load_weekly_token(
    store: &Store,
    timestamp: u64,
    token: &str,
) -> Result<WeeklyTokenMetric, StoreError> {
    let week = buckets::week_start(timestamp);
    Ok(store
        .get_weekly_token_metric(week, token)?
        .unwrap_or_else(|| WeeklyTokenMetric::new(week, token)))
}

fn load_daily_operator(
    store: &Store,
    timestamp: u64,
    operator: &str,
) -> Result<DailyOperatorMetric, StoreError> {
    let day = buckets::day_start(timestamp);
    Ok(store
        .get_daily_operator_metric(day, operator)?
        .unwrap_or_else(|| DailyOperatorMetric::new(day, operator)))
}

fn collect_rail_creation(
    store: &Store,
    effect: &MetricEffect,
    timestamp: u64,
) -> Result<(), StoreError> {
    let MetricEffect::RailCreated {
        payer,
        payee,
        operator,
        token,
        payer_is_new_account,
        payee_is_new_account,
        operator_is_new,
        payer_first_rail,
        payee_first_rail,
    } = effect
    else {
        return Ok(());
    };

    let mut daily = load_daily(store, timestamp)?;
    daily.rails_created += 1;
    if *payer_first_rail {
        daily.new_payers += 1;
    }
    if *payee_first_rail {
        daily.new_payees += 1;
    }
    if *operator_is_new {
        daily.new_operators += 1;
    }
    store.put_daily_metric(&daily)?;

    let week = buckets::week_start(timestamp);
    let mut weekly = load_weekly(store, timestamp)?;
    weekly.rails_created += 1;
    // The marker row is the whole uniqueness signal: count a payer/payee at
    // most once per (week, address) without re-scanning history.
    if store.mark_weekly_payer(week, payer)? {
        weekly.unique_active_payers += 1;
    }
    if store.mark_weekly_payee(week, payee)? {
        weekly.unique_active_payees += 1;
    }
    if *payer_first_rail {
        weekly.new_payers += 1;
    }
    if *payee_first_rail {
        weekly.new_payees += 1;
    }
    if *operator_is_new {
        weekly.new_operators += 1;
    }
    store.put_weekly_metric(&weekly)?;

    let mut daily_token = load_daily_token(store, timestamp, token)?;
    daily_token.active_rails_count += 1;
    store.put_daily_token_metric(&daily_token)?;

    let mut weekly_token = load_weekly_token(store, timestamp, token)?;
    weekly_token.active_rails_count += 1;
    store.put_weekly_token_metric(&weekly_token)?;

    let mut daily_operator = load_daily_operator(store, timestamp, operator)?;
    daily_operator.rails_created += 1;
    // New client relationships, not new rails: a rail whose payer and payee
    // are both brand-new counts twice.
    if *payer_is_new_account {
        daily_operator.unique_clients += 1;
    }
    if *payee_is_new_account {
        daily_operator.unique_clients += 1;
    }
    store.put_daily_operator_metric(&daily_operator)?;

    let mut totals = store.get_network_totals()?;
    totals.total_rails += 1;
    totals.total_zero_rate_rails += 1;
    if *payer_is_new_account {
        totals.total_accounts += 1;
    }
    if *payee_is_new_account {
        totals.total_accounts += 1;
    }
    if *payer_first_rail {
        totals.unique_payers += 1;
    }
    if *payee_first_rail {
        totals.unique_payees += 1;
    }
    store.put_network_totals(&totals)?;

    Ok(())
}

fn collect_settlement(
    store: &Store,
    effect: &MetricEffect,
    timestamp: u64,
) -> Result<(), StoreError> {
    let MetricEffect::Settlement {
        token,
        operator,
        total_settled,
        net_payee,
        commission,
        network_fee,
    } = effect
    else {
        return Ok(());
    };

    let mut daily = load_daily(store, timestamp)?;
    daily.total_rail_settlements += 1;
    daily.fil_burned += network_fee;
    store.put_daily_metric(&daily)?;

    let mut weekly = load_weekly(store, timestamp)?;
    weekly.total_rail_settlements += 1;
    weekly.fil_burned += network_fee;
    store.put_weekly_metric(&weekly)?;

    let mut daily_operator = load_daily_operator(store, timestamp, operator)?;
    daily_operator.settlements_processed += 1;
    store.put_daily_operator_metric(&daily_operator)?;

    let mut daily_token = load_daily_token(store, timestamp, token)?;
    daily_token.volume += total_settled;
    daily_token.settled_amount += net_payee;
    daily_token.commission_paid += commission;
    store.put_daily_token_metric(&daily_token)?;

    let mut weekly_token = load_weekly_token(store, timestamp, token)?;
    weekly_token.volume += total_settled;
    weekly_token.settled_amount += net_payee;
    weekly_token.commission_paid += commission;
    store.put_weekly_token_metric(&weekly_token)?;

    let mut totals = store.get_network_totals()?;
    totals.total_fil_burned += network_fee;
    store.put_network_totals(&totals)?;

    Ok(())
}

fn collect_rail_state_change(
    store: &Store,
    from: RailState,
    to: RailState,
    timestamp: u64,
) -> Result<(), StoreError> {
    // Redundant emissions happen; a same-state change must not move counters.
    if from == to {
        return Ok(());
    }

    match to {
        RailState::Terminated => {
            let mut daily = load_daily(store, timestamp)?;
            daily.rails_terminated += 1;
            store.put_daily_metric(&daily)?;

            let mut weekly = load_weekly(store, timestamp)?;
            weekly.rails_terminated += 1;
            store.put_weekly_metric(&weekly)?;

            let mut totals = store.get_network_totals()?;
            totals.total_terminated_rails += 1;
            totals.total_active_rails = (totals.total_active_rails - 1).max(0);
            store.put_network_totals(&totals)?;
        }
        RailState::Finalized => {
            let mut daily = load_daily(store, timestamp)?;
            daily.rails_finalized += 1;
            store.put_daily_metric(&daily)?;

            let mut weekly = load_weekly(store, timestamp)?;
            weekly.rails_finalized += 1;
            store.put_weekly_metric(&weekly)?;

            let mut totals = store.get_network_totals()?;
            totals.total_finalized_rails += 1;
            totals.total_terminated_rails = (totals.total_terminated_rails - 1).max(0);
            store.put_network_totals(&totals)?;
        }
        RailState::Active if from == RailState::ZeroRate => {
            let mut daily = load_daily(store, timestamp)?;
            daily.active_rails_count += 1;
            store.put_daily_metric(&daily)?;

            let mut weekly = load_weekly(store, timestamp)?;
            weekly.active_rails_count += 1;
            store.put_weekly_metric(&weekly)?;

            let mut totals = store.get_network_totals()?;
            totals.total_active_rails += 1;
            totals.total_zero_rate_rails = (totals.total_zero_rate_rails - 1).max(0);
            store.put_network_totals(&totals)?;
        }
        _ => {
            // Not a legal state-machine edge; the rail handlers never emit
            // these, so surface it loudly if one ever shows up.
            log::warn!("ignoring unexpected rail state change {:?} -> {:?}", from, to);
        }
    }

    Ok(())
}

fn collect_token_activity(
    store: &Store,
    effect: &MetricEffect,
    timestamp: u64,
) -> Result<(), StoreError> {
    let MetricEffect::TokenActivity {
        token,
        account: _,
        direction,
        amount,
        account_is_new,
        holder_is_new,
        token_is_new,
    } = effect
    else {
        return Ok(());
    };

    let mut daily = load_daily(store, timestamp)?;
    if *account_is_new {
        daily.new_accounts += 1;
    }
    store.put_daily_metric(&daily)?;

    let mut daily_token = load_daily_token(store, timestamp, token)?;
    daily_token.volume += amount;
    match direction {
        ActivityDirection::Deposit => daily_token.deposit += amount,
        ActivityDirection::Withdraw => daily_token.withdrawal += amount,
    }
    if *holder_is_new {
        daily_token.unique_holders += 1;
    }
    store.put_daily_token_metric(&daily_token)?;

    let mut weekly_token = load_weekly_token(store, timestamp, token)?;
    weekly_token.volume += amount;
    match direction {
        ActivityDirection::Deposit => weekly_token.deposit += amount,
        ActivityDirection::Withdraw => weekly_token.withdrawal += amount,
    }
    if *holder_is_new {
        weekly_token.unique_holders += 1;
    }
    store.put_weekly_token_metric(&weekly_token)?;

    let mut totals = store.get_network_totals()?;
    if *account_is_new {
        totals.total_accounts += 1;
    }
    if *token_is_new {
        totals.total_tokens += 1;
    }
    store.put_network_totals(&totals)?;

    Ok(())
}

fn collect_operator_approval(
    store: &Store,
    operator: &str,
    approval_is_new: bool,
    operator_is_new: bool,
    timestamp: u64,
) -> Result<(), StoreError> {
    if approval_is_new {
        let mut daily_operator = load_daily_operator(store, timestamp, operator)?;
        daily_operator.total_approvals += 1;
        store.put_daily_operator_metric(&daily_operator)?;
    }

    if operator_is_new {
        let mut totals = store.get_network_totals()?;
        totals.total_operators += 1;
        store.put_network_totals(&totals)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::from_text;
    use crate::store::schema;
    use rusqlite::Connection;

    // 2024-01-10 15:30:00 UTC, Wednesday
    const TS: u64 = 1_704_900_600;

    fn open_store_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();
        conn
    }

    fn rail_created(payer: &str, payee: &str, first: bool) -> MetricEffect {
        MetricEffect::RailCreated {
            payer: payer.to_string(),
            payee: payee.to_string(),
            operator: "0xop".to_string(),
            token: "0xtok".to_string(),
            payer_is_new_account: first,
            payee_is_new_account: first,
            operator_is_new: false,
            payer_first_rail: first,
            payee_first_rail: first,
        }
    }

    #[test]
    fn test_weekly_unique_payers_count_once_per_week() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        // Same payer creates 5 rails within one week
        for i in 0..5 {
            apply_effect(&store, &rail_created("0xpayer", "0xpayee", i == 0), TS + i * 600).unwrap();
        }

        let weekly = store
            .get_weekly_metric(buckets::week_start(TS))
            .unwrap()
            .unwrap();
        assert_eq!(weekly.rails_created, 5);
        assert_eq!(weekly.unique_active_payers, 1);
        assert_eq!(weekly.unique_active_payees, 1);

        // A rail in the following week counts independently
        apply_effect(&store, &rail_created("0xpayer", "0xpayee", false), TS + 7 * 86_400).unwrap();
        let next_week = store
            .get_weekly_metric(buckets::week_start(TS + 7 * 86_400))
            .unwrap()
            .unwrap();
        assert_eq!(next_week.unique_active_payers, 1);
    }

    #[test]
    fn test_rail_creation_network_totals() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        apply_effect(&store, &rail_created("0xa", "0xb", true), TS).unwrap();

        let totals = store.get_network_totals().unwrap();
        assert_eq!(totals.total_rails, 1);
        assert_eq!(totals.total_zero_rate_rails, 1);
        assert_eq!(totals.total_accounts, 2);
        assert_eq!(totals.unique_payers, 1);
        assert_eq!(totals.unique_payees, 1);

        let daily_op = store
            .get_daily_operator_metric(buckets::day_start(TS), "0xop")
            .unwrap()
            .unwrap();
        assert_eq!(daily_op.rails_created, 1);
        // Both sides brand-new: two new client relationships
        assert_eq!(daily_op.unique_clients, 2);
    }

    #[test]
    fn test_state_change_same_state_is_noop() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        apply_effect(
            &store,
            &MetricEffect::RailStateChanged {
                from: RailState::Terminated,
                to: RailState::Terminated,
            },
            TS,
        )
        .unwrap();

        assert!(store.get_daily_metric(buckets::day_start(TS)).unwrap().is_none());
        assert_eq!(store.get_network_totals().unwrap().total_terminated_rails, 0);
    }

    #[test]
    fn test_zero_rate_to_active_transition() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        // Seed one zero-rate rail so the decrement has something to consume
        apply_effect(&store, &rail_created("0xa", "0xb", true), TS).unwrap();
        apply_effect(
            &store,
            &MetricEffect::RailStateChanged {
                from: RailState::ZeroRate,
                to: RailState::Active,
            },
            TS,
        )
        .unwrap();

        let daily = store.get_daily_metric(buckets::day_start(TS)).unwrap().unwrap();
        assert_eq!(daily.active_rails_count, 1);

        let totals = store.get_network_totals().unwrap();
        assert_eq!(totals.total_active_rails, 1);
        assert_eq!(totals.total_zero_rate_rails, 0);
    }

    #[test]
    fn test_termination_then_finalization_counts() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        apply_effect(
            &store,
            &MetricEffect::RailStateChanged {
                from: RailState::Active,
                to: RailState::Terminated,
            },
            TS,
        )
        .unwrap();
        apply_effect(
            &store,
            &MetricEffect::RailStateChanged {
                from: RailState::Terminated,
                to: RailState::Finalized,
            },
            TS,
        )
        .unwrap();

        let totals = store.get_network_totals().unwrap();
        assert_eq!(totals.total_terminated_rails, 0); // incremented then released
        assert_eq!(totals.total_finalized_rails, 1);
        // Clamped at zero, never negative
        assert_eq!(totals.total_active_rails, 0);

        let daily = store.get_daily_metric(buckets::day_start(TS)).unwrap().unwrap();
        assert_eq!(daily.rails_terminated, 1);
        assert_eq!(daily.rails_finalized, 1);
    }

    #[test]
    fn test_settlement_fans_out_to_token_and_network() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        apply_effect(
            &store,
            &MetricEffect::Settlement {
                token: "0xtok".to_string(),
                operator: "0xop".to_string(),
                total_settled: from_text("500").unwrap(),
                net_payee: from_text("450").unwrap(),
                commission: from_text("50").unwrap(),
                network_fee: from_text("10").unwrap(),
            },
            TS,
        )
        .unwrap();

        let daily = store.get_daily_metric(buckets::day_start(TS)).unwrap().unwrap();
        assert_eq!(daily.total_rail_settlements, 1);
        assert_eq!(daily.fil_burned, from_text("10").unwrap());

        let token_day = store
            .get_daily_token_metric(buckets::day_start(TS), "0xtok")
            .unwrap()
            .unwrap();
        assert_eq!(token_day.volume, from_text("500").unwrap());
        assert_eq!(token_day.settled_amount, from_text("450").unwrap());
        assert_eq!(token_day.commission_paid, from_text("50").unwrap());

        assert_eq!(
            store.get_network_totals().unwrap().total_fil_burned,
            from_text("10").unwrap()
        );
    }

    #[test]
    fn test_deposit_activity_counts_new_holder_once() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        let deposit = |is_new: bool| MetricEffect::TokenActivity {
            token: "0xtok".to_string(),
            account: "0xa".to_string(),
            direction: ActivityDirection::Deposit,
            amount: from_text("1000000").unwrap(),
            account_is_new: is_new,
            holder_is_new: is_new,
            token_is_new: is_new,
        };

        apply_effect(&store, &deposit(true), TS).unwrap();
        apply_effect(&store, &deposit(false), TS).unwrap();

        let token_day = store
            .get_daily_token_metric(buckets::day_start(TS), "0xtok")
            .unwrap()
            .unwrap();
        assert_eq!(token_day.deposit, from_text("2000000").unwrap());
        assert_eq!(token_day.unique_holders, 1);

        let totals = store.get_network_totals().unwrap();
        assert_eq!(totals.total_accounts, 1);
        assert_eq!(totals.total_tokens, 1);
    }
}
