//! Price feed read over JSON-RPC `eth_call`.

use super::{PriceError, PriceSource};
use crate::domain::{Address, Decimal};
use crate::ledger::{JsonRpcLedger, LedgerError};
use alloy_primitives::{keccak256, U256};
use async_trait::async_trait;
use std::sync::Arc;

const FETCH_PRICE_SIGNATURE: &str = "fetchPrice()";

/// Calls `fetchPrice()` on a price feed contract.
#[derive(Debug, Clone)]
pub struct RpcPriceSource {
    ledger: Arc<JsonRpcLedger>,
    feed: Address,
    decimals: u32,
}

impl RpcPriceSource {
    pub fn new(ledger: Arc<JsonRpcLedger>, feed: Address, decimals: u32) -> Self {
        Self {
            ledger,
            feed,
            decimals,
        }
    }
}

#[async_trait]
impl PriceSource for RpcPriceSource {
    async fn live_price(&self) -> Result<Decimal, PriceError> {
        let selector = keccak256(FETCH_PRICE_SIGNATURE);
        let output = self
            .ledger
            .call(&self.feed, &selector[..4])
            .await
            .map_err(classify)?;
        parse_price(&output, self.decimals)
    }
}

/// A revert mentioning a frozen feed is recoverable from the cache.
fn classify(err: LedgerError) -> PriceError {
    match &err {
        LedgerError::Rpc { message, .. } if message.to_lowercase().contains("frozen") => {
            PriceError::Frozen(message.clone())
        }
        _ => PriceError::Unavailable(err.to_string()),
    }
}

fn parse_price(output: &[u8], decimals: u32) -> Result<Decimal, PriceError> {
    if output.len() < 32 {
        return Err(PriceError::Unavailable(format!(
            "fetchPrice returned {} bytes",
            output.len()
        )));
    }
    let raw = U256::from_be_slice(&output[..32]);
    Decimal::from_fixed_point(raw, decimals).map_err(|e| PriceError::Unavailable(e.to_string()))
}
