//! Ledger abstraction for querying the chain head and raw event logs.

use crate::domain::{Address, LogEntry};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod jsonrpc;
pub mod mock;

pub use jsonrpc::JsonRpcLedger;
pub use mock::MockLedger;

/// Read-only ledger query interface.
///
/// Implementations must not partially return a range: any failure fails
/// the whole call.
#[async_trait]
pub trait LedgerClient: Send + Sync + fmt::Debug {
    /// Current chain head block number.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Fetch logs emitted by `addresses` in `[from, to]` (inclusive).
    ///
    /// # Arguments
    /// * `from` - First block of the range
    /// * `to` - Last block of the range
    /// * `addresses` - Watched contract addresses
    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<LogEntry>, LedgerError>;

    /// Deployed bytecode length at `address`; 0 for accounts without code.
    async fn code_size(&self, address: &Address) -> Result<usize, LedgerError>;
}

/// Error type for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Network error (e.g., connection timeout, DNS failure)
    #[error("Network error: {0}")]
    NetworkError(String),
    /// HTTP error (e.g., 5xx server error)
    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },
    /// Rate limit exceeded
    #[error("Rate limited")]
    RateLimited,
    /// JSON-RPC error object returned by the node
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// Parsing error (invalid JSON or malformed response)
    #[error("Parse error: {0}")]
    ParseError(String),
}
