use std::env;

/// Configuration loaded from environment variables
pub struct Config {
    pub db_path: String,
    pub events_path: String,
    pub eth_rpc_url: Option<String>,
    pub rust_log: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// RAILFLOW_EVENTS must point at the JSONL event feed. The database path
    /// defaults next to the working directory; ETH_RPC_URL is optional and
    /// enables live ERC20 metadata lookups (without it every new token gets
    /// the Unknown/UNKNOWN/18 fallback).
    pub fn from_env() -> Self {
        let events_path =
            env::var("RAILFLOW_EVENTS").expect("RAILFLOW_EVENTS must be set in .env file");

        let db_path = env::var("RAILFLOW_DB").unwrap_or_else(|_| "railflow.db".to_string());

        let eth_rpc_url = env::var("ETH_RPC_URL").ok();

        let rust_log = env::var("RUST_LOG").ok();

        Self {
            db_path,
            events_path,
            eth_rpc_url,
            rust_log,
        }
    }
}
