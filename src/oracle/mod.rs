//! Two-tier oracle price reader.
//!
//! The live feed is authoritative. When the feed reports itself frozen the
//! reader falls back to the last price it cached; any other failure is
//! surfaced as unavailable.

pub mod mock;
pub mod rpc;

use crate::db::Repository;
use crate::domain::Decimal;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub use mock::MockPriceSource;
pub use rpc::RpcPriceSource;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    /// The feed is reachable but refuses to serve a fresh price.
    #[error("price feed frozen: {0}")]
    Frozen(String),
    #[error("price unavailable: {0}")]
    Unavailable(String),
}

/// A live price feed.
#[async_trait]
pub trait PriceSource: Send + Sync + fmt::Debug {
    async fn live_price(&self) -> Result<Decimal, PriceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceOrigin {
    Live,
    Cached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceObservation {
    pub price: Decimal,
    pub source: PriceOrigin,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OracleReader {
    source: Arc<dyn PriceSource>,
    repo: Arc<Repository>,
}

impl OracleReader {
    pub fn new(source: Arc<dyn PriceSource>, repo: Arc<Repository>) -> Self {
        Self { source, repo }
    }

    /// Read the current price, falling back to the cache only when the feed
    /// is frozen.
    pub async fn read(&self) -> Result<PriceObservation, PriceError> {
        match self.source.live_price().await {
            Ok(price) => {
                let observed_at = Utc::now();
                if let Err(e) = self.repo.cache_price(price, observed_at).await {
                    warn!(error = %e, "Failed to cache live price");
                }
                debug!(%price, "Live price");
                Ok(PriceObservation {
                    price,
                    source: PriceOrigin::Live,
                    observed_at,
                })
            }
            Err(PriceError::Frozen(reason)) => {
                warn!(%reason, "Price feed frozen; using cached price");
                match self.repo.latest_cached_price().await {
                    Ok(Some(cached)) => Ok(PriceObservation {
                        price: cached.price,
                        source: PriceOrigin::Cached,
                        observed_at: cached.observed_at,
                    }),
                    Ok(None) => Err(PriceError::Unavailable(format!(
                        "feed frozen ({}) and no cached price",
                        reason
                    ))),
                    Err(e) => Err(PriceError::Unavailable(format!(
                        "feed frozen ({}) and cache unreadable: {}",
                        reason, e
                    ))),
                }
            }
            Err(e) => Err(e),
        }
    }
}
