//! Read-only query surface over committed entities and aggregates
//!
//! This is the in-process contract the dashboard/API layer consumes: entity
//! lookup by id plus time-ranged scans of the aggregate tables ordered by
//! bucket timestamp. Every returned struct serializes monetary fields as
//! base-10 integer strings, so full precision survives the boundary.

use rusqlite::{params, Connection};

use crate::entities::{
    Account, Operator, OperatorApproval, OperatorToken, Rail, RateChangeQueueEntry, Settlement,
    Token, UserToken,
};
use crate::events::rail_id_key;
use crate::metrics::aggregates::{
    DailyMetric, DailyOperatorMetric, DailyTokenMetric, NetworkTotals, WeeklyMetric,
    WeeklyTokenMetric,
};
use crate::store::{Store, StoreError};

pub struct Query<'c> {
    store: Store<'c>,
}

impl<'c> Query<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            store: Store::new(conn),
        }
    }

    // Entity lookups

    pub fn account(&self, address: &str) -> Result<Option<Account>, StoreError> {
        self.store.get_account(address)
    }

    pub fn token(&self, address: &str) -> Result<Option<Token>, StoreError> {
        self.store.get_token(address)
    }

    pub fn user_token(&self, account: &str, token: &str) -> Result<Option<UserToken>, StoreError> {
        self.store.get_user_token(account, token)
    }

    pub fn operator(&self, address: &str) -> Result<Option<Operator>, StoreError> {
        self.store.get_operator(address)
    }

    pub fn operator_token(
        &self,
        operator: &str,
        token: &str,
    ) -> Result<Option<OperatorToken>, StoreError> {
        self.store.get_operator_token(operator, token)
    }

    pub fn operator_approval(
        &self,
        client: &str,
        operator: &str,
        token: &str,
    ) -> Result<Option<OperatorApproval>, StoreError> {
        self.store.get_operator_approval(client, operator, token)
    }

    pub fn rail(&self, rail_id: u64) -> Result<Option<Rail>, StoreError> {
        self.store.get_rail(&rail_id_key(rail_id))
    }

    /// Settlement history for one rail, oldest first.
    pub fn settlements_for_rail(&self, rail_id: u64) -> Result<Vec<Settlement>, StoreError> {
        let key = rail_id_key(rail_id);
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT transaction_hash, log_index FROM settlements
             WHERE rail_id = ?1
             ORDER BY block_number ASC, log_index ASC",
        )?;
        let keys: Vec<(String, u32)> = stmt
            .query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let mut settlements = Vec::with_capacity(keys.len());
        for (tx_hash, log_index) in keys {
            if let Some(settlement) = self.store.get_settlement(&tx_hash, log_index)? {
                settlements.push(settlement);
            }
        }
        Ok(settlements)
    }

    /// Historical rate segments for one rail, oldest first.
    pub fn rate_changes_for_rail(
        &self,
        rail_id: u64,
    ) -> Result<Vec<RateChangeQueueEntry>, StoreError> {
        self.store.rate_changes_for_rail(&rail_id_key(rail_id))
    }

    // Aggregate scans. Range bounds are inclusive bucket timestamps.

    pub fn daily_metrics(&self, from: u64, until: u64) -> Result<Vec<DailyMetric>, StoreError> {
        let buckets = self.bucket_scan(
            "SELECT day_start FROM metrics_daily
             WHERE day_start >= ?1 AND day_start <= ?2 ORDER BY day_start ASC",
            from,
            until,
        )?;
        let mut metrics = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if let Some(m) = self.store.get_daily_metric(bucket)? {
                metrics.push(m);
            }
        }
        Ok(metrics)
    }

    pub fn weekly_metrics(&self, from: u64, until: u64) -> Result<Vec<WeeklyMetric>, StoreError> {
        let buckets = self.bucket_scan(
            "SELECT week_start FROM metrics_weekly
             WHERE week_start >= ?1 AND week_start <= ?2 ORDER BY week_start ASC",
            from,
            until,
        )?;
        let mut metrics = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if let Some(m) = self.store.get_weekly_metric(bucket)? {
                metrics.push(m);
            }
        }
        Ok(metrics)
    }

    pub fn daily_token_metrics(
        &self,
        token: &str,
        from: u64,
        until: u64,
    ) -> Result<Vec<DailyTokenMetric>, StoreError> {
        let buckets = self.keyed_bucket_scan(
            "SELECT day_start FROM metrics_daily_token
             WHERE token = ?1 AND day_start >= ?2 AND day_start <= ?3 ORDER BY day_start ASC",
            token,
            from,
            until,
        )?;
        let mut metrics = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if let Some(m) = self.store.get_daily_token_metric(bucket, token)? {
                metrics.push(m);
            }
        }
        Ok(metrics)
    }

    pub fn weekly_token_metrics(
        &self,
        token: &str,
        from: u64,
        until: u64,
    ) -> Result<Vec<WeeklyTokenMetric>, StoreError> {
        let buckets = self.keyed_bucket_scan(
            "SELECT week_start FROM metrics_weekly_token
             WHERE token = ?1 AND week_start >= ?2 AND week_start <= ?3 ORDER BY week_start ASC",
            token,
            from,
            until,
        )?;
        let mut metrics = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if let Some(m) = self.store.get_weekly_token_metric(bucket, token)? {
                metrics.push(m);
            }
        }
        Ok(metrics)
    }

    pub fn daily_operator_metrics(
        &self,
        operator: &str,
        from: u64,
        until: u64,
    ) -> Result<Vec<DailyOperatorMetric>, StoreError> {
        let buckets = self.keyed_bucket_scan(
            "SELECT day_start FROM metrics_daily_operator
             WHERE operator = ?1 AND day_start >= ?2 AND day_start <= ?3 ORDER BY day_start ASC",
            operator,
            from,
            until,
        )?;
        let mut metrics = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            if let Some(m) = self.store.get_daily_operator_metric(bucket, operator)? {
                metrics.push(m);
            }
        }
        Ok(metrics)
    }

    pub fn network_totals(&self) -> Result<NetworkTotals, StoreError> {
        self.store.get_network_totals()
    }

    fn bucket_scan(&self, sql: &str, from: u64, until: u64) -> Result<Vec<u64>, StoreError> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(sql)?;
        let buckets = stmt
            .query_map(params![from, until], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(buckets)
    }

    fn keyed_bucket_scan(
        &self,
        sql: &str,
        key: &str,
        from: u64,
        until: u64,
    ) -> Result<Vec<u64>, StoreError> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(sql)?;
        let buckets = stmt
            .query_map(params![key, from, until], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(buckets)
    }
}
