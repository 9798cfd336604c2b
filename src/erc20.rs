//! ERC20 token metadata lookup
//!
//! Provides name/symbol/decimals enrichment for lazily created tokens via
//! `eth_call` against a JSON-RPC endpoint:
//! - `name()`     selector `0x06fdde03`
//! - `symbol()`   selector `0x95d89b41`
//! - `decimals()` selector `0x313ce567`
//!
//! Lookup failure is never fatal. Each RPC field falls back individually to
//! `"Unknown"` / `"UNKNOWN"` / 18 decimals, and `fetch_or_default` covers a
//! source that cannot answer at all, so event processing can continue offline
//! or against tokens with non-standard metadata.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

const NAME_SELECTOR: &str = "0x06fdde03";
const SYMBOL_SELECTOR: &str = "0x95d89b41";
const DECIMALS_SELECTOR: &str = "0x313ce567";

/// On-chain ERC20 metadata for one token contract
#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
}

impl TokenMetadata {
    /// Placeholder used when the chain cannot be asked or doesn't answer.
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            symbol: "UNKNOWN".to_string(),
            decimals: 18,
        }
    }
}

/// Where token metadata comes from. The indexer only depends on this trait,
/// so tests run without a network.
pub trait TokenMetadataSource {
    fn fetch(&self, address: &str) -> Result<TokenMetadata, Box<dyn std::error::Error>>;

    fn fetch_or_default(&self, address: &str) -> TokenMetadata {
        match self.fetch(address) {
            Ok(metadata) => metadata,
            Err(err) => {
                log::warn!("metadata lookup failed for {}: {}, using fallback", address, err);
                TokenMetadata::unknown()
            }
        }
    }
}

/// Always answers with the fallback. Used when no RPC endpoint is configured
/// and throughout the test suite.
#[derive(Debug, Default)]
pub struct NullMetadataSource;

impl TokenMetadataSource for NullMetadataSource {
    fn fetch(&self, _address: &str) -> Result<TokenMetadata, Box<dyn std::error::Error>> {
        Err("no metadata source configured".into())
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<serde_json::Value>,
}

/// JSON-RPC backed metadata source
pub struct RpcMetadataSource {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl RpcMetadataSource {
    pub fn new(endpoint: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    fn eth_call(&self, address: &str, selector: &str) -> Result<String, Box<dyn std::error::Error>> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": address, "data": selector}, "latest"],
        });

        let response = self.client.post(&self.endpoint).json(&body).send()?;
        if !response.status().is_success() {
            return Err(format!("RPC error: {}", response.status()).into());
        }

        let parsed: RpcResponse = response.json()?;
        if let Some(error) = parsed.error {
            return Err(format!("eth_call failed: {}", error).into());
        }
        parsed.result.ok_or_else(|| "empty eth_call result".into())
    }
}

impl TokenMetadataSource for RpcMetadataSource {
    fn fetch(&self, address: &str) -> Result<TokenMetadata, Box<dyn std::error::Error>> {
        // Each field falls back on its own, so a token with a broken symbol()
        // still keeps whatever name and decimals the chain did answer.
        let fallback = TokenMetadata::unknown();
        let name = field_or_fallback(
            self.eth_call(address, NAME_SELECTOR)
                .and_then(|raw| decode_abi_string(&raw)),
            fallback.name,
            "name",
            address,
        );
        let symbol = field_or_fallback(
            self.eth_call(address, SYMBOL_SELECTOR)
                .and_then(|raw| decode_abi_string(&raw)),
            fallback.symbol,
            "symbol",
            address,
        );
        let decimals = field_or_fallback(
            self.eth_call(address, DECIMALS_SELECTOR)
                .and_then(|raw| decode_abi_uint(&raw)),
            fallback.decimals,
            "decimals",
            address,
        );
        Ok(TokenMetadata { name, symbol, decimals })
    }
}

fn field_or_fallback<T>(
    lookup: Result<T, Box<dyn std::error::Error>>,
    fallback: T,
    field: &str,
    address: &str,
) -> T {
    match lookup {
        Ok(value) => value,
        Err(err) => {
            log::warn!("{} lookup failed for {}: {}, using fallback", field, address, err);
            fallback
        }
    }
}

/// Decode an ABI-encoded `string` return value: 32-byte offset, 32-byte
/// length, then UTF-8 data.
fn decode_abi_string(result: &str) -> Result<String, Box<dyn std::error::Error>> {
    let bytes = hex::decode(result.trim_start_matches("0x"))?;
    if bytes.len() < 64 {
        return Err("ABI string return too short".into());
    }

    let length = u64::from_be_bytes(bytes[56..64].try_into()?) as usize;
    let end = 64_usize
        .checked_add(length)
        .ok_or("ABI string length overflow")?;
    if bytes.len() < end {
        return Err("ABI string data truncated".into());
    }

    Ok(String::from_utf8(bytes[64..end].to_vec())?)
}

/// Decode a `uint8`/`uint256` return value, taking the low 4 bytes.
fn decode_abi_uint(result: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let bytes = hex::decode(result.trim_start_matches("0x"))?;
    if bytes.len() < 32 {
        return Err("ABI uint return too short".into());
    }
    Ok(u32::from_be_bytes(bytes[28..32].try_into()?))
}
