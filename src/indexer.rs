//! Event indexer: one SQLite transaction per chain event
//!
//! Entity mutations and all derived aggregate updates for a single event
//! commit together or not at all, so a crash mid-event can never leave the
//! aggregates out of step with the entities. Events must arrive in
//! chain order (block number, then log index); the indexer applies them
//! as given and does not reorder.

use std::fmt;

use rusqlite::Connection;

use crate::erc20::TokenMetadataSource;
use crate::events::EventEnvelope;
use crate::handlers;
use crate::metrics::collectors;
use crate::store::{Store, StoreError};

#[derive(Debug)]
pub enum IndexerError {
    Database(rusqlite::Error),
    Store(StoreError),
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerError::Database(e) => write!(f, "database error: {}", e),
            IndexerError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl std::error::Error for IndexerError {}

impl From<rusqlite::Error> for IndexerError {
    fn from(e: rusqlite::Error) -> Self {
        IndexerError::Database(e)
    }
}

impl From<StoreError> for IndexerError {
    fn from(e: StoreError) -> Self {
        IndexerError::Store(e)
    }
}

pub struct Indexer {
    conn: Connection,
    metadata: Box<dyn TokenMetadataSource>,
    events_processed: u64,
}

impl Indexer {
    pub fn new(conn: Connection, metadata: Box<dyn TokenMetadataSource>) -> Self {
        Self {
            conn,
            metadata,
            events_processed: 0,
        }
    }

    /// Apply one event atomically: handler deltas plus every metric effect
    /// it fanned out. A failed commit is fatal to the caller.
    pub fn process_event(&mut self, envelope: &EventEnvelope) -> Result<(), IndexerError> {
        self.run(envelope, None)
    }

    /// Like [`process_event`](Self::process_event), but also commits the feed
    /// cursor in the same transaction, so a crash never replays the event.
    pub fn process_event_at(
        &mut self,
        envelope: &EventEnvelope,
        feed_offset: u64,
    ) -> Result<(), IndexerError> {
        self.run(envelope, Some(feed_offset))
    }

    fn run(&mut self, envelope: &EventEnvelope, feed_offset: Option<u64>) -> Result<(), IndexerError> {
        let tx = self.conn.transaction()?;
        {
            let store = Store::new(&tx);
            let effects = handlers::apply(&store, envelope, self.metadata.as_ref())?;
            for effect in &effects {
                collectors::apply_effect(&store, effect, envelope.block_timestamp)?;
            }
            if let Some(offset) = feed_offset {
                store.put_feed_offset(offset)?;
            }
        }
        tx.commit()?;

        self.events_processed += 1;
        if self.events_processed % 1000 == 0 {
            log::info!("📊 processed {} events", self.events_processed);
        }
        Ok(())
    }

    /// Apply a batch in the order given. Stops at the first failure so the
    /// caller can halt rather than process events out of order.
    pub fn process_batch(&mut self, envelopes: &[EventEnvelope]) -> Result<usize, IndexerError> {
        for (i, envelope) in envelopes.iter().enumerate() {
            if let Err(e) = self.process_event(envelope) {
                log::error!(
                    "event {}/{} failed at block {} log {}: {}",
                    i + 1,
                    envelopes.len(),
                    envelope.block_number,
                    envelope.log_index,
                    e
                );
                return Err(e);
            }
        }
        Ok(envelopes.len())
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Hand the connection back, e.g. to build a read-side [`crate::query::Query`].
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}
