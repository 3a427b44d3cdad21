//! JSON-RPC ledger client (`eth_blockNumber`, `eth_getLogs`, `eth_call`).

use super::{LedgerClient, LedgerError};
use crate::domain::{Address, LogEntry, TxHash};
use alloy_primitives::B256;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Ledger client speaking Ethereum JSON-RPC over HTTP.
#[derive(Debug)]
pub struct JsonRpcLedger {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcLedger {
    /// Build a client whose requests fail after `timeout` with a
    /// `NetworkError`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: String, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::NetworkError(e.to_string()))?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: String, client: Client) -> Self {
        Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        }
    }

    /// Send one JSON-RPC request and return its `result`.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| LedgerError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status == 429 {
            return Err(LedgerError::RateLimited);
        }
        if !status.is_success() {
            return Err(LedgerError::HttpError {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("Unexpected status")
                    .to_string(),
            });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| LedgerError::ParseError(e.to_string()))?;
        extract_result(body)
    }

    /// `eth_call` against `to` with raw calldata, at the latest block.
    pub async fn call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, LedgerError> {
        let result = self
            .request(
                "eth_call",
                json!([{ "to": to.as_str(), "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| LedgerError::ParseError("eth_call result is not a string".into()))?;
        decode_hex_bytes(hex_str)
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| LedgerError::ParseError("eth_blockNumber result is not a string".into()))?;
        parse_quantity(hex_str)
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<LogEntry>, LedgerError> {
        debug!(from, to, addresses = addresses.len(), "eth_getLogs");

        let filter = json!({
            "fromBlock": format!("0x{:x}", from),
            "toBlock": format!("0x{:x}", to),
            "address": addresses.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
        });
        let result = self.request("eth_getLogs", json!([filter])).await?;
        let raw_logs: Vec<RpcLog> = serde_json::from_value(result)
            .map_err(|e| LedgerError::ParseError(format!("eth_getLogs: {}", e)))?;

        let mut logs = Vec::with_capacity(raw_logs.len());
        for raw in raw_logs {
            if raw.removed.unwrap_or(false) {
                continue;
            }
            logs.push(raw.into_entry()?);
        }
        Ok(logs)
    }

    async fn code_size(&self, address: &Address) -> Result<usize, LedgerError> {
        let result = self
            .request("eth_getCode", json!([address.as_str(), "latest"]))
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| LedgerError::ParseError("eth_getCode result is not a string".into()))?;
        Ok(decode_hex_bytes(hex_str)?.len())
    }
}

/// A raw log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    transaction_hash: String,
    log_index: String,
    removed: Option<bool>,
}

impl RpcLog {
    fn into_entry(self) -> Result<LogEntry, LedgerError> {
        let topics = self
            .topics
            .iter()
            .map(|t| {
                B256::from_str(t)
                    .map_err(|e| LedgerError::ParseError(format!("invalid topic {}: {}", t, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LogEntry {
            address: Address::new(self.address),
            topics,
            data: decode_hex_bytes(&self.data)?,
            tx_hash: TxHash::new(self.transaction_hash),
            block_number: parse_quantity(&self.block_number)?,
            log_index: parse_quantity(&self.log_index)?,
        })
    }
}

fn extract_result(body: Value) -> Result<Value, LedgerError> {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let mut message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        // Revert payloads sometimes carry the reason only in `data`.
        if let Some(data) = error.get("data").and_then(|d| d.as_str()) {
            message = format!("{} ({})", message, data);
        }
        return Err(LedgerError::Rpc { code, message });
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| LedgerError::ParseError("response has neither result nor error".into()))
}

/// Parse a hex quantity (`0x1a`) into u64.
pub fn parse_quantity(s: &str) -> Result<u64, LedgerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::ParseError(format!("invalid quantity {}: {}", s, e)))
}

fn decode_hex_bytes(s: &str) -> Result<Vec<u8>, LedgerError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| LedgerError::ParseError(format!("invalid hex data: {}", e)))
}
