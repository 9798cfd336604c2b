//! Indexer Binary - Payment Rail Event Processor
//!
//! Tails the JSONL chain-event feed and applies each event to the entity
//! store and aggregate metrics, one atomic transaction per event.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin indexer
//! ```
//!
//! ## Environment Variables
//!
//! - RAILFLOW_EVENTS - Path to the JSONL event feed (required)
//! - RAILFLOW_DB - SQLite database path (default: railflow.db)
//! - ETH_RPC_URL - JSON-RPC endpoint for ERC20 metadata lookups (optional)
//! - RUST_LOG - Logging level (optional, default: info)

use std::path::PathBuf;

use rusqlite::Connection;

use railflow::config::Config;
use railflow::erc20::{NullMetadataSource, RpcMetadataSource, TokenMetadataSource};
use railflow::indexer::Indexer;
use railflow::ingest::EventFeedReader;
use railflow::store::{schema, Store};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = Config::from_env();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.rust_log.as_deref().unwrap_or("info")),
    )
    .init();

    log::info!("🚀 Starting railflow indexer");
    log::info!("   database: {}", config.db_path);
    log::info!("   feed:     {}", config.events_path);

    let conn = Connection::open(&config.db_path)?;
    schema::run_migrations(&conn)?;

    let metadata: Box<dyn TokenMetadataSource> = match &config.eth_rpc_url {
        Some(url) => {
            log::info!("   metadata: {}", url);
            Box::new(RpcMetadataSource::new(url)?)
        }
        None => {
            log::info!("   metadata: disabled, using fallback values");
            Box::new(NullMetadataSource)
        }
    };

    let offset = Store::new(&conn).get_feed_offset()?;
    let mut reader = EventFeedReader::open(PathBuf::from(&config.events_path), offset)?;
    let mut indexer = Indexer::new(conn, metadata);

    // An event that fails to commit corrupts every aggregate after it, so
    // the first error stops the process.
    loop {
        let envelope = reader.wait_for_event()?;
        indexer.process_event_at(&envelope, reader.offset())?;
    }
}
