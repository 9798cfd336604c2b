//! End-to-end indexer tests: ordered event sequences in, committed entity
//! state and aggregates out
//!
//! These drive the full handler + collector path through `Indexer` against a
//! real SQLite file and read everything back through the `Query` surface,
//! the same way the dashboard layer would.

use rusqlite::Connection;

use railflow::amount::{from_text, zero};
use railflow::entities::RailState;
use railflow::erc20::NullMetadataSource;
use railflow::events::{EventEnvelope, EventPayload};
use railflow::indexer::Indexer;
use railflow::metrics::buckets;
use railflow::query::Query;
use railflow::store::schema;

/// Sunday 2024-01-07 00:00:00 UTC, a known week start.
const WEEK_ONE: u64 = 1_704_585_600;
const WEEK_TWO: u64 = WEEK_ONE + 604_800;

struct EventBuilder {
    block_number: u64,
    log_index: u32,
    timestamp: u64,
}

impl EventBuilder {
    fn new(timestamp: u64) -> Self {
        Self {
            block_number: 100,
            log_index: 0,
            timestamp,
        }
    }

    fn next(&mut self, event: EventPayload) -> EventEnvelope {
        self.block_number += 1;
        self.log_index += 1;
        EventEnvelope {
            block_number: self.block_number,
            block_timestamp: self.timestamp,
            transaction_hash: format!("0xtx{}", self.block_number),
            log_index: self.log_index,
            event,
        }
    }

    fn at(&mut self, timestamp: u64) -> &mut Self {
        self.timestamp = timestamp;
        self
    }
}

fn open_indexer() -> (tempfile::TempDir, Indexer) {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open(dir.path().join("railflow.db")).unwrap();
    schema::run_migrations(&conn).unwrap();
    (dir, Indexer::new(conn, Box::new(NullMetadataSource)))
}

fn deposit(token: &str, account: &str, amount: &str) -> EventPayload {
    EventPayload::Deposit {
        token: token.to_string(),
        account: account.to_string(),
        amount: from_text(amount).unwrap(),
    }
}

fn rail_created(rail_id: u64, payer: &str, payee: &str) -> EventPayload {
    EventPayload::RailCreated {
        rail_id,
        payer: payer.to_string(),
        payee: payee.to_string(),
        operator: "0xoperator".to_string(),
        token: "0xtoken".to_string(),
        arbiter: "0xarbiter".to_string(),
        service_fee_recipient: String::new(),
        commission_rate_bps: 100,
    }
}

fn rate_modified(rail_id: u64, old: &str, new: &str) -> EventPayload {
    EventPayload::RailRateModified {
        rail_id,
        old_rate: from_text(old).unwrap(),
        new_rate: from_text(new).unwrap(),
    }
}

fn approval(client: &str) -> EventPayload {
    EventPayload::OperatorApprovalUpdated {
        client: client.to_string(),
        operator: "0xoperator".to_string(),
        token: "0xtoken".to_string(),
        rate_allowance: from_text("1000000").unwrap(),
        lockup_allowance: from_text("1000000000").unwrap(),
        max_lockup_period: 2880,
        is_approved: true,
    }
}

#[test]
fn test_full_rail_lifecycle() {
    let (_dir, mut indexer) = open_indexer();
    let mut b = EventBuilder::new(WEEK_ONE + 3_600);

    let events = vec![
        b.next(approval("0xalice")),
        b.next(deposit("0xtoken", "0xalice", "1000")),
        b.next(rail_created(1, "0xalice", "0xbob")),
        b.next(rate_modified(1, "0", "1000")),
        b.next(EventPayload::RailSettled {
            rail_id: 1,
            total_settled_amount: from_text("500").unwrap(),
            total_net_payee_amount: from_text("450").unwrap(),
            operator_commission: from_text("50").unwrap(),
            network_fee: from_text("10").unwrap(),
            settled_upto: 104,
        }),
        b.next(EventPayload::RailTerminated {
            rail_id: 1,
            by: "0xalice".to_string(),
            end_epoch: 200,
        }),
        b.next(EventPayload::RailFinalized { rail_id: 1 }),
    ];
    indexer.process_batch(&events).unwrap();

    let conn = indexer.into_connection();
    let query = Query::new(&conn);

    // Rail walked the full edge sequence and kept its settlement totals
    let rail = query.rail(1).unwrap().unwrap();
    assert_eq!(rail.state, RailState::Finalized);
    assert_eq!(rail.end_epoch, 200);
    assert_eq!(rail.settled_upto, 104);
    assert_eq!(rail.total_settled_amount, from_text("500").unwrap());
    assert_eq!(rail.total_settlements, 1);

    // Settlement arithmetic: payer 1000 -> 500, payee 0 -> 450
    let payer = query.user_token("0xalice", "0xtoken").unwrap().unwrap();
    assert_eq!(payer.funds, from_text("500").unwrap());
    assert_eq!(payer.payout, from_text("500").unwrap());
    // Terminated rail stopped reserving lockup
    assert_eq!(payer.lockup_rate, zero());

    let payee = query.user_token("0xbob", "0xtoken").unwrap().unwrap();
    assert_eq!(payee.funds, from_text("450").unwrap());
    assert_eq!(payee.funds_collected, from_text("450").unwrap());

    // Commission exited user-fund accounting: 1000 - 50
    let token = query.token("0xtoken").unwrap().unwrap();
    assert_eq!(token.user_funds, from_text("950").unwrap());

    // Usage counters ended non-negative after the full cycle
    let approval = query
        .operator_approval("0xalice", "0xoperator", "0xtoken")
        .unwrap()
        .unwrap();
    assert!(approval.rate_usage >= zero());
    assert!(approval.lockup_usage >= zero());

    // Network totals walked every transition
    let totals = query.network_totals().unwrap();
    assert_eq!(totals.total_rails, 1);
    assert_eq!(totals.total_active_rails, 0);
    assert_eq!(totals.total_zero_rate_rails, 0);
    assert_eq!(totals.total_terminated_rails, 0);
    assert_eq!(totals.total_finalized_rails, 1);
    assert_eq!(totals.total_fil_burned, from_text("10").unwrap());

    // Daily rollup for the event day
    let day = buckets::day_start(WEEK_ONE + 3_600);
    let daily = query.daily_metrics(day, day).unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].rails_created, 1);
    assert_eq!(daily[0].active_rails_count, 1);
    assert_eq!(daily[0].rails_terminated, 1);
    assert_eq!(daily[0].rails_finalized, 1);
    assert_eq!(daily[0].total_rail_settlements, 1);
    assert_eq!(daily[0].fil_burned, from_text("10").unwrap());

    let settlements = query.settlements_for_rail(1).unwrap();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].network_fee, from_text("10").unwrap());
}

#[test]
fn test_zero_rate_activation_moves_network_counters() {
    let (_dir, mut indexer) = open_indexer();
    let mut b = EventBuilder::new(WEEK_ONE + 3_600);

    indexer
        .process_batch(&[
            b.next(approval("0xalice")),
            b.next(rail_created(1, "0xalice", "0xbob")),
        ])
        .unwrap();

    {
        let query = Query::new(indexer.connection());
        let totals = query.network_totals().unwrap();
        assert_eq!(totals.total_zero_rate_rails, 1);
        assert_eq!(totals.total_active_rails, 0);
    }

    let activate = b.next(rate_modified(1, "0", "1000"));
    indexer.process_event(&activate).unwrap();

    let query = Query::new(indexer.connection());
    let totals = query.network_totals().unwrap();
    assert_eq!(totals.total_zero_rate_rails, 0);
    assert_eq!(totals.total_active_rails, 1);

    let rail = query.rail(1).unwrap().unwrap();
    assert_eq!(rail.state, RailState::Active);
}

#[test]
fn test_lockup_rate_tracks_live_rails_only() {
    let (_dir, mut indexer) = open_indexer();
    let mut b = EventBuilder::new(WEEK_ONE + 3_600);

    indexer
        .process_batch(&[
            b.next(approval("0xalice")),
            b.next(rail_created(1, "0xalice", "0xbob")),
            b.next(rail_created(2, "0xalice", "0xcarol")),
            b.next(rate_modified(1, "0", "300")),
            b.next(rate_modified(2, "0", "700")),
        ])
        .unwrap();

    {
        let query = Query::new(indexer.connection());
        let payer = query.user_token("0xalice", "0xtoken").unwrap().unwrap();
        assert_eq!(payer.lockup_rate, from_text("1000").unwrap());
    }

    // Terminating one rail drops exactly its rate from the sum
    let terminate = b.next(EventPayload::RailTerminated {
        rail_id: 1,
        by: "0xalice".to_string(),
        end_epoch: 500,
    });
    indexer.process_event(&terminate).unwrap();

    let query = Query::new(indexer.connection());
    let payer = query.user_token("0xalice", "0xtoken").unwrap().unwrap();
    assert_eq!(payer.lockup_rate, from_text("700").unwrap());
}

#[test]
fn test_weekly_unique_payers_count_once_per_week() {
    let (_dir, mut indexer) = open_indexer();
    let mut b = EventBuilder::new(WEEK_ONE + 3_600);

    // Five rails by the same payer in week one
    let mut events = vec![b.next(approval("0xalice"))];
    for rail_id in 1..=5 {
        events.push(b.next(rail_created(rail_id, "0xalice", "0xbob")));
    }
    indexer.process_batch(&events).unwrap();

    // One more rail in week two
    let next_week = b.at(WEEK_TWO + 3_600).next(rail_created(6, "0xalice", "0xbob"));
    indexer.process_event(&next_week).unwrap();

    let conn = indexer.into_connection();
    let query = Query::new(&conn);

    let weeks = query.weekly_metrics(WEEK_ONE, WEEK_TWO).unwrap();
    assert_eq!(weeks.len(), 2);
    assert_eq!(weeks[0].week_start, WEEK_ONE);
    assert_eq!(weeks[0].rails_created, 5);
    assert_eq!(weeks[0].unique_active_payers, 1);
    assert_eq!(weeks[1].week_start, WEEK_TWO);
    assert_eq!(weeks[1].rails_created, 1);
    assert_eq!(weeks[1].unique_active_payers, 1);
}

#[test]
fn test_first_deposit_creates_account_token_pair() {
    let (_dir, mut indexer) = open_indexer();
    let mut b = EventBuilder::new(WEEK_ONE + 3_600);

    let event = b.next(deposit("0xtoken", "0xalice", "1000000"));
    indexer.process_event(&event).unwrap();

    let conn = indexer.into_connection();
    let query = Query::new(&conn);

    let token = query.token("0xtoken").unwrap().unwrap();
    assert_eq!(token.total_users, 1);
    assert_eq!(token.user_funds, from_text("1000000").unwrap());
    // No metadata source configured: fallback identity
    assert_eq!(token.name, "Unknown");
    assert_eq!(token.symbol, "UNKNOWN");
    assert_eq!(token.decimals, 18);

    let account = query.account("0xalice").unwrap().unwrap();
    assert_eq!(account.total_tokens, 1);

    let ut = query.user_token("0xalice", "0xtoken").unwrap().unwrap();
    assert_eq!(ut.funds, from_text("1000000").unwrap());
}

#[test]
fn test_unknown_rail_events_never_halt_the_stream() {
    let (_dir, mut indexer) = open_indexer();
    let mut b = EventBuilder::new(WEEK_ONE + 3_600);

    // Settlement and termination for rails that don't exist, then a valid
    // deposit: the stream keeps going and the bad events leave no trace.
    let events = vec![
        b.next(EventPayload::RailSettled {
            rail_id: 42,
            total_settled_amount: from_text("500").unwrap(),
            total_net_payee_amount: from_text("450").unwrap(),
            operator_commission: from_text("50").unwrap(),
            network_fee: from_text("10").unwrap(),
            settled_upto: 104,
        }),
        b.next(EventPayload::RailTerminated {
            rail_id: 43,
            by: "0xalice".to_string(),
            end_epoch: 200,
        }),
        b.next(deposit("0xtoken", "0xalice", "7")),
    ];
    indexer.process_batch(&events).unwrap();

    let conn = indexer.into_connection();
    let query = Query::new(&conn);
    assert!(query.rail(42).unwrap().is_none());
    let totals = query.network_totals().unwrap();
    assert_eq!(totals.total_fil_burned, zero());
    assert_eq!(totals.total_accounts, 1);
}
