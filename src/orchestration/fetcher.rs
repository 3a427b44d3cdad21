//! Bounded-range log queries over the watched contracts.

use crate::domain::{Address, LogEntry};
use crate::ledger::{LedgerClient, LedgerError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Ledger query failed; the whole range must be retried.
    #[error("transient fetch failure: {0}")]
    Transient(#[from] LedgerError),
    #[error("invalid block range [{from}, {to}]")]
    InvalidRange { from: u64, to: u64 },
}

/// Reads raw logs for a fixed set of contracts.
#[derive(Debug, Clone)]
pub struct LogFetcher {
    client: Arc<dyn LedgerClient>,
    watched: Vec<Address>,
}

impl LogFetcher {
    pub fn new(client: Arc<dyn LedgerClient>, watched: Vec<Address>) -> Self {
        Self { client, watched }
    }

    pub fn watched(&self) -> &[Address] {
        &self.watched
    }

    /// Current chain head.
    pub async fn head(&self) -> Result<u64, FetchError> {
        Ok(self.client.block_number().await?)
    }

    /// All logs emitted by the watched contracts in `[from, to]`, ordered by
    /// (block number, log index). Never returns part of a range.
    pub async fn fetch(&self, from: u64, to: u64) -> Result<Vec<LogEntry>, FetchError> {
        if from > to {
            return Err(FetchError::InvalidRange { from, to });
        }

        let mut logs = self.client.get_logs(from, to, &self.watched).await?;
        logs.sort_by_key(|log| log.position());

        debug!(from, to, count = logs.len(), "Fetched logs");
        Ok(logs)
    }
}
