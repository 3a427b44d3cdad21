//! Mock ledger for testing without network calls.

use super::{LedgerClient, LedgerError};
use crate::domain::{Address, LogEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MockState {
    head: u64,
    logs: Vec<LogEntry>,
    code_sizes: HashMap<Address, usize>,
    failing_fetches: usize,
    failing_heads: usize,
    fetch_calls: Vec<(u64, u64)>,
}

/// Mock ledger that serves scripted logs and can inject failures.
#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    /// Create a new mock ledger at head 0 with no logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chain head.
    pub fn with_head(self, head: u64) -> Self {
        self.set_head(head);
        self
    }

    /// Add a log entry.
    pub fn with_log(self, log: LogEntry) -> Self {
        self.push_log(log);
        self
    }

    /// Add multiple log entries.
    pub fn with_logs(self, logs: Vec<LogEntry>) -> Self {
        for log in logs {
            self.push_log(log);
        }
        self
    }

    /// Deploy `size` bytes of code at `address`.
    pub fn with_code(self, address: Address, size: usize) -> Self {
        self.lock().code_sizes.insert(address, size);
        self
    }

    pub fn set_head(&self, head: u64) {
        self.lock().head = head;
    }

    pub fn push_log(&self, log: LogEntry) {
        self.lock().logs.push(log);
    }

    /// Make the next `n` calls to `get_logs` fail with a network error.
    pub fn fail_next_fetches(&self, n: usize) {
        self.lock().failing_fetches = n;
    }

    /// Make the next `n` calls to `block_number` fail with a network error.
    pub fn fail_next_heads(&self, n: usize) {
        self.lock().failing_heads = n;
    }

    /// Every `(from, to)` range requested so far, failed calls included.
    pub fn fetch_calls(&self) -> Vec<(u64, u64)> {
        self.lock().fetch_calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A panicking test thread must not poison the other assertions.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        if state.failing_heads > 0 {
            state.failing_heads -= 1;
            return Err(LedgerError::NetworkError("mock head failure".to_string()));
        }
        Ok(state.head)
    }

    async fn get_logs(
        &self,
        from: u64,
        to: u64,
        addresses: &[Address],
    ) -> Result<Vec<LogEntry>, LedgerError> {
        let mut state = self.lock();
        state.fetch_calls.push((from, to));
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(LedgerError::NetworkError("mock fetch failure".to_string()));
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.block_number >= from
                    && log.block_number <= to
                    && addresses.contains(&log.address)
            })
            .cloned()
            .collect())
    }

    async fn code_size(&self, address: &Address) -> Result<usize, LedgerError> {
        Ok(self.lock().code_sizes.get(address).copied().unwrap_or(0))
    }
}
