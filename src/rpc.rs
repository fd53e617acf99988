//! Chain-data provider access
//!
//! `ChainClient` is the capability the tracking loop needs from a
//! provider: the current tip and a block with its transactions.
//! `RpcClient` implements it over Ethereum JSON-RPC. No retries happen
//! here; the tracking loop retries by waiting for its next tick.

use crate::error::ProviderError;
use crate::types::{parse_quantity, Block};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Remote chain-data provider.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Get the highest block number the provider knows.
    async fn latest_block_number(&self) -> Result<u64, ProviderError>;

    /// Get a block with full transaction objects.
    async fn block_with_transactions(&self, number: u64) -> Result<Block, ProviderError>;
}

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Create a new RPC client.
    ///
    /// Every HTTP request is bounded by `timeout`.
    pub fn new(url: String, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    /// Make a JSON-RPC call and return the `result` field.
    async fn call(&self, method: &'static str, params: Value) -> Result<Value, ProviderError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response: Value = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        extract_result(method, response)
    }
}

/// Pull `result` out of a JSON-RPC response, surfacing `error` objects.
fn extract_result(method: &'static str, mut response: Value) -> Result<Value, ProviderError> {
    if let Some(error) = response.get("error") {
        return Err(ProviderError::Rpc {
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        });
    }

    response
        .get_mut("result")
        .map(Value::take)
        .ok_or(ProviderError::MissingResult(method))
}

fn decode_block(number: u64, result: Value) -> Result<Block, ProviderError> {
    // Nodes answer `null` for blocks past their head
    if result.is_null() {
        return Err(ProviderError::BlockUnavailable(number));
    }
    serde_json::from_value(result).map_err(|e| ProviderError::Decode {
        what: "block",
        reason: e.to_string(),
    })
}

fn decode_block_number(result: &Value) -> Result<u64, ProviderError> {
    let s = result.as_str().ok_or_else(|| ProviderError::Decode {
        what: "block number",
        reason: format!("expected hex string, got {}", result),
    })?;
    parse_quantity(s).map_err(|e| ProviderError::Decode {
        what: "block number",
        reason: e.to_string(),
    })
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn latest_block_number(&self) -> Result<u64, ProviderError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        decode_block_number(&result)
    }

    async fn block_with_transactions(&self, number: u64) -> Result<Block, ProviderError> {
        let params = json!([format!("0x{:x}", number), true]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        decode_block(number, result)
    }
}
