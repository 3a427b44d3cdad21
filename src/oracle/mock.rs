//! Scripted price source for tests.

use super::{PriceError, PriceSource};
use crate::domain::Decimal;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Returns queued results in order; once the queue is drained the last
/// result is repeated.
#[derive(Debug, Default)]
pub struct MockPriceSource {
    script: Mutex<VecDeque<Result<Decimal, PriceError>>>,
    last: Mutex<Option<Result<Decimal, PriceError>>>,
}

impl MockPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, price: Decimal) -> Self {
        self.push(Ok(price));
        self
    }

    pub fn push(&self, result: Result<Decimal, PriceError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn live_price(&self) -> Result<Decimal, PriceError> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(result) = next {
            *last = Some(result);
        }
        last.clone()
            .unwrap_or_else(|| Err(PriceError::Unavailable("no scripted price".to_string())))
    }
}
