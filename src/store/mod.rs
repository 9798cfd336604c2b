//! Typed entity store over SQLite
//!
//! One `get_*`/`put_*` pair per entity and aggregate row. All writes are
//! UPSERTs so "load-or-create, mutate, save" needs no existence checks at
//! the SQL level. A `Store` borrows a connection; the indexer hands it a
//! `rusqlite::Transaction` (which derefs to `Connection`) so every event's
//! full fan-out commits atomically or not at all.

pub mod schema;

use rusqlite::{params, Connection, OptionalExtension};

use crate::amount::{self, Amount};
use crate::entities::{
    Account, Operator, OperatorApproval, OperatorToken, Rail, RailState, RateChangeQueueEntry,
    Settlement, Token, UserToken,
};
use crate::metrics::aggregates::{
    DailyMetric, DailyOperatorMetric, DailyTokenMetric, NetworkTotals, WeeklyMetric,
    WeeklyTokenMetric,
};

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    MalformedAmount { table: &'static str, value: String },
    UnknownRailState(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "database error: {}", e),
            StoreError::MalformedAmount { table, value } => {
                write!(f, "malformed amount in {}: {:?}", table, value)
            }
            StoreError::UnknownRailState(s) => write!(f, "unknown rail state: {:?}", s),
        }
    }
}

impl std::error::Error for StoreError {}

fn parse_amount(table: &'static str, text: String) -> Result<Amount, StoreError> {
    amount::from_text(&text).ok_or(StoreError::MalformedAmount { table, value: text })
}

/// Typed access to one open connection (or transaction).
pub struct Store<'c> {
    conn: &'c Connection,
}

impl<'c> Store<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        self.conn
    }

    // ---- accounts ----

    pub fn get_account(&self, address: &str) -> Result<Option<Account>, StoreError> {
        self.conn
            .query_row(
                "SELECT address, total_rails, total_approvals, total_tokens, created_at
                 FROM accounts WHERE address = ?",
                [address],
                |row| {
                    Ok(Account {
                        address: row.get(0)?,
                        total_rails: row.get(1)?,
                        total_approvals: row.get(2)?,
                        total_tokens: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn put_account(&self, account: &Account) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO accounts (address, total_rails, total_approvals, total_tokens, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                 total_rails = excluded.total_rails,
                 total_approvals = excluded.total_approvals,
                 total_tokens = excluded.total_tokens",
            params![
                account.address,
                account.total_rails,
                account.total_approvals,
                account.total_tokens,
                account.created_at,
            ],
        )?;
        Ok(())
    }

    // ---- tokens ----

    pub fn get_token(&self, address: &str) -> Result<Option<Token>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT address, name, symbol, decimals, volume, total_deposits,
                        total_withdrawals, total_settled_amount, user_funds, total_users, created_at
                 FROM tokens WHERE address = ?",
                [address],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, u64>(10)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((address, name, symbol, decimals, vol, dep, wit, set, uf, users, created)) => {
                Ok(Some(Token {
                    address,
                    name,
                    symbol,
                    decimals,
                    volume: parse_amount("tokens", vol)?,
                    total_deposits: parse_amount("tokens", dep)?,
                    total_withdrawals: parse_amount("tokens", wit)?,
                    total_settled_amount: parse_amount("tokens", set)?,
                    user_funds: parse_amount("tokens", uf)?,
                    total_users: users,
                    created_at: created,
                }))
            }
        }
    }

    pub fn put_token(&self, token: &Token) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO tokens (address, name, symbol, decimals, volume, total_deposits,
                                 total_withdrawals, total_settled_amount, user_funds,
                                 total_users, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                 volume = excluded.volume,
                 total_deposits = excluded.total_deposits,
                 total_withdrawals = excluded.total_withdrawals,
                 total_settled_amount = excluded.total_settled_amount,
                 user_funds = excluded.user_funds,
                 total_users = excluded.total_users",
            params![
                token.address,
                token.name,
                token.symbol,
                token.decimals,
                amount::to_text(&token.volume),
                amount::to_text(&token.total_deposits),
                amount::to_text(&token.total_withdrawals),
                amount::to_text(&token.total_settled_amount),
                amount::to_text(&token.user_funds),
                token.total_users,
                token.created_at,
            ],
        )?;
        Ok(())
    }

    // ---- user tokens ----

    pub fn get_user_token(&self, account: &str, token: &str) -> Result<Option<UserToken>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT account, token, funds, lockup_current, lockup_rate,
                        lockup_last_settled_until_epoch, lockup_last_settled_at,
                        payout, funds_collected
                 FROM user_tokens WHERE account = ? AND token = ?",
                [account, token],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, u64>(5)?,
                        row.get::<_, u64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((account, token, funds, lc, lr, until, at, payout, collected)) => {
                Ok(Some(UserToken {
                    account,
                    token,
                    funds: parse_amount("user_tokens", funds)?,
                    lockup_current: parse_amount("user_tokens", lc)?,
                    lockup_rate: parse_amount("user_tokens", lr)?,
                    lockup_last_settled_until_epoch: until,
                    lockup_last_settled_at: at,
                    payout: parse_amount("user_tokens", payout)?,
                    funds_collected: parse_amount("user_tokens", collected)?,
                }))
            }
        }
    }

    pub fn put_user_token(&self, ut: &UserToken) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO user_tokens (account, token, funds, lockup_current, lockup_rate,
                                      lockup_last_settled_until_epoch, lockup_last_settled_at,
                                      payout, funds_collected)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(account, token) DO UPDATE SET
                 funds = excluded.funds,
                 lockup_current = excluded.lockup_current,
                 lockup_rate = excluded.lockup_rate,
                 lockup_last_settled_until_epoch = excluded.lockup_last_settled_until_epoch,
                 lockup_last_settled_at = excluded.lockup_last_settled_at,
                 payout = excluded.payout,
                 funds_collected = excluded.funds_collected",
            params![
                ut.account,
                ut.token,
                amount::to_text(&ut.funds),
                amount::to_text(&ut.lockup_current),
                amount::to_text(&ut.lockup_rate),
                ut.lockup_last_settled_until_epoch,
                ut.lockup_last_settled_at,
                amount::to_text(&ut.payout),
                amount::to_text(&ut.funds_collected),
            ],
        )?;
        Ok(())
    }

    // ---- operators ----

    pub fn get_operator(&self, address: &str) -> Result<Option<Operator>, StoreError> {
        self.conn
            .query_row(
                "SELECT address, total_rails, total_approvals, created_at
                 FROM operators WHERE address = ?",
                [address],
                |row| {
                    Ok(Operator {
                        address: row.get(0)?,
                        total_rails: row.get(1)?,
                        total_approvals: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn put_operator(&self, operator: &Operator) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO operators (address, total_rails, total_approvals, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                 total_rails = excluded.total_rails,
                 total_approvals = excluded.total_approvals",
            params![
                operator.address,
                operator.total_rails,
                operator.total_approvals,
                operator.created_at,
            ],
        )?;
        Ok(())
    }

    // ---- operator tokens ----

    pub fn get_operator_token(
        &self,
        operator: &str,
        token: &str,
    ) -> Result<Option<OperatorToken>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT operator, token, settled_amount, volume, commission_earned, total_rails
                 FROM operator_tokens WHERE operator = ? AND token = ?",
                [operator, token],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((operator, token, settled, volume, commission, rails)) => Ok(Some(OperatorToken {
                operator,
                token,
                settled_amount: parse_amount("operator_tokens", settled)?,
                volume: parse_amount("operator_tokens", volume)?,
                commission_earned: parse_amount("operator_tokens", commission)?,
                total_rails: rails,
            })),
        }
    }

    pub fn put_operator_token(&self, ot: &OperatorToken) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO operator_tokens (operator, token, settled_amount, volume,
                                          commission_earned, total_rails)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(operator, token) DO UPDATE SET
                 settled_amount = excluded.settled_amount,
                 volume = excluded.volume,
                 commission_earned = excluded.commission_earned,
                 total_rails = excluded.total_rails",
            params![
                ot.operator,
                ot.token,
                amount::to_text(&ot.settled_amount),
                amount::to_text(&ot.volume),
                amount::to_text(&ot.commission_earned),
                ot.total_rails,
            ],
        )?;
        Ok(())
    }

    // ---- operator approvals ----

    pub fn get_operator_approval(
        &self,
        client: &str,
        operator: &str,
        token: &str,
    ) -> Result<Option<OperatorApproval>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT client, operator, token, lockup_allowance, lockup_usage,
                        rate_allowance, rate_usage, max_lockup_period, is_approved
                 FROM operator_approvals WHERE client = ? AND operator = ? AND token = ?",
                [client, operator, token],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, u64>(7)?,
                        row.get::<_, bool>(8)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((client, operator, token, la, lu, ra, ru, period, approved)) => {
                Ok(Some(OperatorApproval {
                    client,
                    operator,
                    token,
                    lockup_allowance: parse_amount("operator_approvals", la)?,
                    lockup_usage: parse_amount("operator_approvals", lu)?,
                    rate_allowance: parse_amount("operator_approvals", ra)?,
                    rate_usage: parse_amount("operator_approvals", ru)?,
                    max_lockup_period: period,
                    is_approved: approved,
                }))
            }
        }
    }

    pub fn put_operator_approval(&self, approval: &OperatorApproval) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO operator_approvals (client, operator, token, lockup_allowance,
                                             lockup_usage, rate_allowance, rate_usage,
                                             max_lockup_period, is_approved)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(client, operator, token) DO UPDATE SET
                 lockup_allowance = excluded.lockup_allowance,
                 lockup_usage = excluded.lockup_usage,
                 rate_allowance = excluded.rate_allowance,
                 rate_usage = excluded.rate_usage,
                 max_lockup_period = excluded.max_lockup_period,
                 is_approved = excluded.is_approved",
            params![
                approval.client,
                approval.operator,
                approval.token,
                amount::to_text(&approval.lockup_allowance),
                amount::to_text(&approval.lockup_usage),
                amount::to_text(&approval.rate_allowance),
                amount::to_text(&approval.rate_usage),
                approval.max_lockup_period,
                approval.is_approved,
            ],
        )?;
        Ok(())
    }

    // ---- rails ----

    pub fn get_rail(&self, id: &str) -> Result<Option<Rail>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, rail_id, payer, payee, operator, token, arbiter,
                        service_fee_recipient, commission_rate_bps, payment_rate, lockup_fixed,
                        lockup_period, settled_upto, state, end_epoch, total_settled_amount,
                        total_net_payee_amount, total_commission, total_settlements,
                        total_rate_changes, created_at
                 FROM rails WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, u64>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, u64>(11)?,
                        row.get::<_, u64>(12)?,
                        row.get::<_, String>(13)?,
                        row.get::<_, u64>(14)?,
                        row.get::<_, String>(15)?,
                        row.get::<_, String>(16)?,
                        row.get::<_, String>(17)?,
                        row.get::<_, i64>(18)?,
                        row.get::<_, i64>(19)?,
                        row.get::<_, u64>(20)?,
                    ))
                },
            )
            .optional()?;

        let Some(r) = row else { return Ok(None) };
        let state = RailState::from_str(&r.13).ok_or_else(|| StoreError::UnknownRailState(r.13.clone()))?;
        Ok(Some(Rail {
            id: r.0,
            rail_id: r.1,
            payer: r.2,
            payee: r.3,
            operator: r.4,
            token: r.5,
            arbiter: r.6,
            service_fee_recipient: r.7,
            commission_rate_bps: r.8,
            payment_rate: parse_amount("rails", r.9)?,
            lockup_fixed: parse_amount("rails", r.10)?,
            lockup_period: r.11,
            settled_upto: r.12,
            state,
            end_epoch: r.14,
            total_settled_amount: parse_amount("rails", r.15)?,
            total_net_payee_amount: parse_amount("rails", r.16)?,
            total_commission: parse_amount("rails", r.17)?,
            total_settlements: r.18,
            total_rate_changes: r.19,
            created_at: r.20,
        }))
    }

    pub fn put_rail(&self, rail: &Rail) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO rails (id, rail_id, payer, payee, operator, token, arbiter,
                                service_fee_recipient, commission_rate_bps, payment_rate,
                                lockup_fixed, lockup_period, settled_upto, state, end_epoch,
                                total_settled_amount, total_net_payee_amount, total_commission,
                                total_settlements, total_rate_changes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 payment_rate = excluded.payment_rate,
                 lockup_fixed = excluded.lockup_fixed,
                 lockup_period = excluded.lockup_period,
                 settled_upto = excluded.settled_upto,
                 state = excluded.state,
                 end_epoch = excluded.end_epoch,
                 total_settled_amount = excluded.total_settled_amount,
                 total_net_payee_amount = excluded.total_net_payee_amount,
                 total_commission = excluded.total_commission,
                 total_settlements = excluded.total_settlements,
                 total_rate_changes = excluded.total_rate_changes",
            params![
                rail.id,
                rail.rail_id,
                rail.payer,
                rail.payee,
                rail.operator,
                rail.token,
                rail.arbiter,
                rail.service_fee_recipient,
                rail.commission_rate_bps,
                amount::to_text(&rail.payment_rate),
                amount::to_text(&rail.lockup_fixed),
                rail.lockup_period,
                rail.settled_upto,
                rail.state.as_str(),
                rail.end_epoch,
                amount::to_text(&rail.total_settled_amount),
                amount::to_text(&rail.total_net_payee_amount),
                amount::to_text(&rail.total_commission),
                rail.total_settlements,
                rail.total_rate_changes,
                rail.created_at,
            ],
        )?;
        Ok(())
    }

    // ---- settlements ----

    pub fn insert_settlement(&self, settlement: &Settlement) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO settlements (transaction_hash, log_index, rail_id,
                 total_settled_amount, total_net_payee_amount, operator_commission,
                 network_fee, settled_upto, block_number, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                settlement.transaction_hash,
                settlement.log_index,
                settlement.rail_id,
                amount::to_text(&settlement.total_settled_amount),
                amount::to_text(&settlement.total_net_payee_amount),
                amount::to_text(&settlement.operator_commission),
                amount::to_text(&settlement.network_fee),
                settlement.settled_upto,
                settlement.block_number,
                settlement.timestamp,
            ],
        )?;
        Ok(())
    }

    pub fn get_settlement(
        &self,
        transaction_hash: &str,
        log_index: u32,
    ) -> Result<Option<Settlement>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT transaction_hash, log_index, rail_id, total_settled_amount,
                        total_net_payee_amount, operator_commission, network_fee,
                        settled_upto, block_number, timestamp
                 FROM settlements WHERE transaction_hash = ? AND log_index = ?",
                params![transaction_hash, log_index],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, u64>(7)?,
                        row.get::<_, u64>(8)?,
                        row.get::<_, u64>(9)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((
                transaction_hash,
                log_index,
                rail_id,
                total_settled,
                total_net_payee,
                commission,
                network_fee,
                settled_upto,
                block_number,
                timestamp,
            )) => Ok(Some(Settlement {
                transaction_hash,
                log_index,
                rail_id,
                total_settled_amount: parse_amount("settlements", total_settled)?,
                total_net_payee_amount: parse_amount("settlements", total_net_payee)?,
                operator_commission: parse_amount("settlements", commission)?,
                network_fee: parse_amount("settlements", network_fee)?,
                settled_upto,
                block_number,
                timestamp,
            })),
        }
    }

    // ---- rate change queue ----

    /// Most recent queue entry for a rail, by until_epoch.
    pub fn latest_rate_change(&self, rail_id: &str) -> Result<Option<RateChangeQueueEntry>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT rail_id, start_epoch, until_epoch, rate FROM rate_change_queue
                 WHERE rail_id = ? ORDER BY until_epoch DESC LIMIT 1",
                [rail_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, u64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((rail_id, start_epoch, until_epoch, rate)) => Ok(Some(RateChangeQueueEntry {
                rail_id,
                start_epoch,
                until_epoch,
                rate: parse_amount("rate_change_queue", rate)?,
            })),
        }
    }

    /// All recorded rate segments for a rail, oldest first.
    pub fn rate_changes_for_rail(
        &self,
        rail_id: &str,
    ) -> Result<Vec<RateChangeQueueEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT rail_id, start_epoch, until_epoch, rate FROM rate_change_queue
             WHERE rail_id = ? ORDER BY start_epoch ASC",
        )?;
        let rows: Vec<(String, u64, u64, String)> = stmt
            .query_map([rail_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter()
            .map(|(rail_id, start_epoch, until_epoch, rate)| {
                Ok(RateChangeQueueEntry {
                    rail_id,
                    start_epoch,
                    until_epoch,
                    rate: parse_amount("rate_change_queue", rate)?,
                })
            })
            .collect()
    }

    pub fn insert_rate_change(&self, entry: &RateChangeQueueEntry) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO rate_change_queue (rail_id, start_epoch, until_epoch, rate)
             VALUES (?, ?, ?, ?)",
            params![
                entry.rail_id,
                entry.start_epoch,
                entry.until_epoch,
                amount::to_text(&entry.rate),
            ],
        )?;
        Ok(())
    }

    // ---- daily metrics ----

    pub fn get_daily_metric(&self, day_start: u64) -> Result<Option<DailyMetric>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT day_start, date, rails_created, active_rails_count, rails_terminated,
                        rails_finalized, total_rail_settlements, fil_burned, new_accounts,
                        new_payers, new_payees, new_operators
                 FROM metrics_daily WHERE day_start = ?",
                [day_start],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, i64>(10)?,
                        row.get::<_, i64>(11)?,
                    ))
                },
            )
            .optional()?;

        let Some(r) = row else { return Ok(None) };
        Ok(Some(DailyMetric {
            day_start: r.0,
            date: r.1,
            rails_created: r.2,
            active_rails_count: r.3,
            rails_terminated: r.4,
            rails_finalized: r.5,
            total_rail_settlements: r.6,
            fil_burned: parse_amount("metrics_daily", r.7)?,
            new_accounts: r.8,
            new_payers: r.9,
            new_payees: r.10,
            new_operators: r.11,
        }))
    }

    pub fn put_daily_metric(&self, m: &DailyMetric) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO metrics_daily (day_start, date, rails_created, active_rails_count,
                 rails_terminated, rails_finalized, total_rail_settlements, fil_burned,
                 new_accounts, new_payers, new_payees, new_operators)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(day_start) DO UPDATE SET
                 rails_created = excluded.rails_created,
                 active_rails_count = excluded.active_rails_count,
                 rails_terminated = excluded.rails_terminated,
                 rails_finalized = excluded.rails_finalized,
                 total_rail_settlements = excluded.total_rail_settlements,
                 fil_burned = excluded.fil_burned,
                 new_accounts = excluded.new_accounts,
                 new_payers = excluded.new_payers,
                 new_payees = excluded.new_payees,
                 new_operators = excluded.new_operators",
            params![
                m.day_start,
                m.date,
                m.rails_created,
                m.active_rails_count,
                m.rails_terminated,
                m.rails_finalized,
                m.total_rail_settlements,
                amount::to_text(&m.fil_burned),
                m.new_accounts,
                m.new_payers,
                m.new_payees,
                m.new_operators,
            ],
        )?;
        Ok(())
    }

    // ---- weekly metrics ----

    pub fn get_weekly_metric(&self, week_start: u64) -> Result<Option<WeeklyMetric>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT week_start, week_end, week_number, rails_created, active_rails_count,
                        rails_terminated, rails_finalized, total_rail_settlements, fil_burned,
                        unique_active_payers, unique_active_payees, new_payers, new_payees,
                        new_operators
                 FROM metrics_weekly WHERE week_start = ?",
                [week_start],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, u64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, i64>(10)?,
                        row.get::<_, i64>(11)?,
                        row.get::<_, i64>(12)?,
                        row.get::<_, i64>(13)?,
                    ))
                },
            )
            .optional()?;

        let Some(r) = row else { return Ok(None) };
        Ok(Some(WeeklyMetric {
            week_start: r.0,
            week_end: r.1,
            week_number: r.2,
            rails_created: r.3,
            active_rails_count: r.4,
            rails_terminated: r.5,
            rails_finalized: r.6,
            total_rail_settlements: r.7,
            fil_burned: parse_amount("metrics_weekly", r.8)?,
            unique_active_payers: r.9,
            unique_active_payees: r.10,
            new_payers: r.11,
            new_payees: r.12,
            new_operators: r.13,
        }))
    }

    pub fn put_weekly_metric(&self, m: &WeeklyMetric) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO metrics_weekly (week_start, week_end, week_number, rails_created,
                 active_rails_count, rails_terminated, rails_finalized, total_rail_settlements,
                 fil_burned, unique_active_payers, unique_active_payees, new_payers, new_payees,
                 new_operators)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(week_start) DO UPDATE SET
                 rails_created = excluded.rails_created,
                 active_rails_count = excluded.active_rails_count,
                 rails_terminated = excluded.rails_terminated,
                 rails_finalized = excluded.rails_finalized,
                 total_rail_settlements = excluded.total_rail_settlements,
                 fil_burned = excluded.fil_burned,
                 unique_active_payers = excluded.unique_active_payers,
                 unique_active_payees = excluded.unique_active_payees,
                 new_payers = excluded.new_payers,
                 new_payees = excluded.new_payees,
                 new_operators = excluded.new_operators",
            params![
                m.week_start,
                m.week_end,
                m.week_number,
                m.rails_created,
                m.active_rails_count,
                m.rails_terminated,
                m.rails_finalized,
                m.total_rail_settlements,
                amount::to_text(&m.fil_burned),
                m.unique_active_payers,
                m.unique_active_payees,
                m.new_payers,
                m.new_payees,
                m.new_operators,
            ],
        )?;
        Ok(())
    }

    // ---- daily / weekly token metrics ----

    pub fn get_daily_token_metric(
        &self,
        day_start: u64,
        token: &str,
    ) -> Result<Option<DailyTokenMetric>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT day_start, token, date, volume, deposit, withdrawal, settled_amount,
                        commission_paid, active_rails_count, unique_holders
                 FROM metrics_daily_token WHERE day_start = ? AND token = ?",
                params![day_start, token],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, i64>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some(r) = row else { return Ok(None) };
        Ok(Some(DailyTokenMetric {
            day_start: r.0,
            token: r.1,
            date: r.2,
            volume: parse_amount("metrics_daily_token", r.3)?,
            deposit: parse_amount("metrics_daily_token", r.4)?,
            withdrawal: parse_amount("metrics_daily_token", r.5)?,
            settled_amount: parse_amount("metrics_daily_token", r.6)?,
            commission_paid: parse_amount("metrics_daily_token", r.7)?,
            active_rails_count: r.8,
            unique_holders: r.9,
        }))
    }

    pub fn put_daily_token_metric(&self, m: &DailyTokenMetric) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO metrics_daily_token (day_start, token, date, volume, deposit,
                 withdrawal, settled_amount, commission_paid, active_rails_count, unique_holders)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(day_start, token) DO UPDATE SET
                 volume = excluded.volume,
                 deposit = excluded.deposit,
                 withdrawal = excluded.withdrawal,
                 settled_amount = excluded.settled_amount,
                 commission_paid = excluded.commission_paid,
                 active_rails_count = excluded.active_rails_count,
                 unique_holders = excluded.unique_holders",
            params![
                m.day_start,
                m.token,
                m.date,
                amount::to_text(&m.volume),
                amount::to_text(&m.deposit),
                amount::to_text(&m.withdrawal),
                amount::to_text(&m.settled_amount),
                amount::to_text(&m.commission_paid),
                m.active_rails_count,
                m.unique_holders,
            ],
        )?;
        Ok(())
    }

    pub fn get_weekly_token_metric(
        &self,
        week_start: u64,
        token: &str,
    ) -> Result<Option<WeeklyTokenMetric>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT week_start, week_end, token, volume, deposit, withdrawal,
                        settled_amount, commission_paid, active_rails_count, unique_holders
                 FROM metrics_weekly_token WHERE week_start = ? AND token = ?",
                params![week_start, token],
                |row| {
                    Ok((
                        row.get::<_, u64>(0)?,
                        row.get::<_, u64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, i64>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some(r) = row else { return Ok(None) };
        Ok(Some(WeeklyTokenMetric {
            week_start: r.0,
            week_end: r.1,
            token: r.2,
            volume: parse_amount("metrics_weekly_token", r.3)?,
            deposit: parse_amount("metrics_weekly_token", r.4)?,
            withdrawal: parse_amount("metrics_weekly_token", r.5)?,
            settled_amount: parse_amount("metrics_weekly_token", r.6)?,
            commission_paid: parse_amount("metrics_weekly_token", r.7)?,
            active_rails_count: r.8,
            unique_holders: r.9,
        }))
    }

    pub fn put_weekly_token_metric(&self, m: &WeeklyTokenMetric) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO metrics_weekly_token (week_start, week_end, token, volume, deposit,
                 withdrawal, settled_amount, commission_paid, active_rails_count, unique_holders)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(week_start, token) DO UPDATE SET
                 volume = excluded.volume,
                 deposit = excluded.deposit,
                 withdrawal = excluded.withdrawal,
                 settled_amount = excluded.settled_amount,
                 commission_paid = excluded.commission_paid,
                 active_rails_count = excluded.active_rails_count,
                 unique_holders = excluded.unique_holders",
            params![
                m.week_start,
                m.week_end,
                m.token,
                amount::to_text(&m.volume),
                amount::to_text(&m.deposit),
                amount::to_text(&m.withdrawal),
                amount::to_text(&m.settled_amount),
                amount::to_text(&m.commission_paid),
                m.active_rails_count,
                m.unique_holders,
            ],
        )?;
        Ok(())
    }

    // ---- daily operator metrics ----

    pub fn get_daily_operator_metric(
        &self,
        day_start: u64,
        operator: &str,
    ) -> Result<Option<DailyOperatorMetric>, StoreError> {
        self.conn
            .query_row(
                "SELECT day_start, operator, date, rails_created, unique_clients,
                        settlements_processed, total_approvals
                 FROM metrics_daily_operator WHERE day_start = ? AND operator = ?",
                params![day_start, operator],
                |row| {
                    Ok(DailyOperatorMetric {
                        day_start: row.get(0)?,
                        operator: row.get(1)?,
                        date: row.get(2)?,
                        rails_created: row.get(3)?,
                        unique_clients: row.get(4)?,
                        settlements_processed: row.get(5)?,
                        total_approvals: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn put_daily_operator_metric(&self, m: &DailyOperatorMetric) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO metrics_daily_operator (day_start, operator, date, rails_created,
                 unique_clients, settlements_processed, total_approvals)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(day_start, operator) DO UPDATE SET
                 rails_created = excluded.rails_created,
                 unique_clients = excluded.unique_clients,
                 settlements_processed = excluded.settlements_processed,
                 total_approvals = excluded.total_approvals",
            params![
                m.day_start,
                m.operator,
                m.date,
                m.rails_created,
                m.unique_clients,
                m.settlements_processed,
                m.total_approvals,
            ],
        )?;
        Ok(())
    }

    // ---- network totals (singleton, id 0) ----

    pub fn get_network_totals(&self) -> Result<NetworkTotals, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT total_rails, total_active_rails, total_zero_rate_rails,
                        total_terminated_rails, total_finalized_rails, total_accounts,
                        total_tokens, total_operators, unique_payers, unique_payees,
                        total_fil_burned
                 FROM network_totals WHERE id = 0",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, i64>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(NetworkTotals::default()),
            Some(r) => Ok(NetworkTotals {
                total_rails: r.0,
                total_active_rails: r.1,
                total_zero_rate_rails: r.2,
                total_terminated_rails: r.3,
                total_finalized_rails: r.4,
                total_accounts: r.5,
                total_tokens: r.6,
                total_operators: r.7,
                unique_payers: r.8,
                unique_payees: r.9,
                total_fil_burned: parse_amount("network_totals", r.10)?,
            }),
        }
    }

    pub fn put_network_totals(&self, totals: &NetworkTotals) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO network_totals (id, total_rails, total_active_rails,
                 total_zero_rate_rails, total_terminated_rails, total_finalized_rails,
                 total_accounts, total_tokens, total_operators, unique_payers, unique_payees,
                 total_fil_burned)
             VALUES (0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 total_rails = excluded.total_rails,
                 total_active_rails = excluded.total_active_rails,
                 total_zero_rate_rails = excluded.total_zero_rate_rails,
                 total_terminated_rails = excluded.total_terminated_rails,
                 total_finalized_rails = excluded.total_finalized_rails,
                 total_accounts = excluded.total_accounts,
                 total_tokens = excluded.total_tokens,
                 total_operators = excluded.total_operators,
                 unique_payers = excluded.unique_payers,
                 unique_payees = excluded.unique_payees,
                 total_fil_burned = excluded.total_fil_burned",
            params![
                totals.total_rails,
                totals.total_active_rails,
                totals.total_zero_rate_rails,
                totals.total_terminated_rails,
                totals.total_finalized_rails,
                totals.total_accounts,
                totals.total_tokens,
                totals.total_operators,
                totals.unique_payers,
                totals.unique_payees,
                amount::to_text(&totals.total_fil_burned),
            ],
        )?;
        Ok(())
    }

    // ---- feed cursor ----

    /// Byte offset of the first unprocessed event feed line, 0 when fresh.
    pub fn get_feed_offset(&self) -> Result<u64, StoreError> {
        let offset = self
            .conn
            .query_row("SELECT byte_offset FROM feed_cursor WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(offset.unwrap_or(0))
    }

    pub fn put_feed_offset(&self, offset: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO feed_cursor (id, byte_offset) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET byte_offset = excluded.byte_offset",
            params![offset],
        )?;
        Ok(())
    }

    // ---- weekly uniqueness markers ----

    /// Record a payer as active this week. Returns true if this was the first
    /// sighting for (week, address); the caller bumps the unique counter
    /// exactly when this returns true.
    pub fn mark_weekly_payer(&self, week_start: u64, address: &str) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO weekly_active_payers (week_start, address) VALUES (?, ?)",
            params![week_start, address],
        )?;
        Ok(changed > 0)
    }

    pub fn mark_weekly_payee(&self, week_start: u64, address: &str) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO weekly_active_payees (week_start, address) VALUES (?, ?)",
            params![week_start, address],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::from_text;

    fn open_store_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_account_upsert_round_trip() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        assert!(store.get_account("0xabc").unwrap().is_none());

        let mut account = Account::new("0xabc", 100);
        store.put_account(&account).unwrap();

        account.total_rails = 3;
        store.put_account(&account).unwrap();

        let loaded = store.get_account("0xabc").unwrap().unwrap();
        assert_eq!(loaded.total_rails, 3);
        assert_eq!(loaded.created_at, 100);
    }

    #[test]
    fn test_user_token_amounts_survive_round_trip() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        let mut ut = UserToken::new("0xa", "0xt");
        ut.funds = from_text("115792089237316195423570985008687907853269984665640564039457").unwrap();
        ut.lockup_rate = from_text("-5").unwrap();
        store.put_user_token(&ut).unwrap();

        let loaded = store.get_user_token("0xa", "0xt").unwrap().unwrap();
        assert_eq!(loaded.funds, ut.funds);
        assert_eq!(loaded.lockup_rate, ut.lockup_rate);
    }

    #[test]
    fn test_settlement_insert_is_idempotent_by_key() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        let settlement = Settlement {
            transaction_hash: "0xhash".to_string(),
            log_index: 1,
            rail_id: "0x01".to_string(),
            total_settled_amount: from_text("500").unwrap(),
            total_net_payee_amount: from_text("450").unwrap(),
            operator_commission: from_text("50").unwrap(),
            network_fee: from_text("10").unwrap(),
            settled_upto: 90,
            block_number: 100,
            timestamp: 1700000000,
        };
        store.insert_settlement(&settlement).unwrap();
        store.insert_settlement(&settlement).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM settlements", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_weekly_marker_counts_once() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        assert!(store.mark_weekly_payer(1704585600, "0xp").unwrap());
        assert!(!store.mark_weekly_payer(1704585600, "0xp").unwrap());
        assert!(store.mark_weekly_payer(1705190400, "0xp").unwrap());
    }

    #[test]
    fn test_network_totals_defaults_then_persists() {
        let conn = open_store_conn();
        let store = Store::new(&conn);

        let mut totals = store.get_network_totals().unwrap();
        assert_eq!(totals.total_rails, 0);

        totals.total_rails = 7;
        totals.total_fil_burned = from_text("123").unwrap();
        store.put_network_totals(&totals).unwrap();

        let loaded = store.get_network_totals().unwrap();
        assert_eq!(loaded.total_rails, 7);
        assert_eq!(loaded.total_fil_burned, from_text("123").unwrap());
    }
}
