//! railflow: payment-rail event indexer
//!
//! Reconstructs rail state and balance books from an ordered chain-event
//! feed and rolls activity up into daily/weekly/token/operator aggregates
//! plus a single network-totals record, all in one SQLite database. Each
//! event commits atomically with its full metric fan-out.

pub mod amount;
pub mod config;
pub mod entities;
pub mod erc20;
pub mod events;
pub mod handlers;
pub mod indexer;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod store;
