//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `positions.rs` - Position records, history, and totals
//! - `events.rs` - Raw event audit log, cursor checkpoint, and cached prices

mod events;
mod positions;

use crate::domain::{Address, Decimal, DomainEvent, PositionStatus, TxHash};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another record already holds the identity.
    #[error("position identity {0} already exists")]
    DuplicateIdentity(i64),
    /// No record matched the update filter.
    #[error("no matching position for wallet={wallet} asset={asset}")]
    NotFound { wallet: Address, asset: Address },
    /// A stored value could not be parsed back.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Which records of a pair an update may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Any,
    Only(PositionStatus),
}

/// Optional filters for position listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionFilter {
    pub wallet: Option<Address>,
    pub asset: Option<Address>,
    pub status: Option<PositionStatus>,
}

/// How a lifecycle event was settled the first time it was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Folded into a position and recorded in its history.
    Applied,
    /// Rejected by the fold; no position changed.
    Dropped,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Dropped => "dropped",
        }
    }

    fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "applied" => Ok(EventOutcome::Applied),
            "dropped" => Ok(EventOutcome::Dropped),
            other => Err(StoreError::Corrupt(format!("outcome={:?}", other))),
        }
    }
}

/// One decoded event as stored in the raw event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventRecord {
    pub event: String,
    pub contract: Address,
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub block_number: u64,
    pub decoded_data: serde_json::Value,
}

impl RawEventRecord {
    pub fn from_event(event: &DomainEvent) -> Self {
        RawEventRecord {
            event: event.name.clone(),
            contract: event.contract.clone(),
            tx_hash: event.tx_hash.clone(),
            log_index: event.log_index,
            block_number: event.block_number,
            decoded_data: event.fields_json(),
        }
    }
}

/// Last successfully read oracle price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedPrice {
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Sums over all active positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTotals {
    pub count: u64,
    pub coll: Decimal,
    pub debt: Decimal,
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_decimal(column: &str, value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str_canonical(value)
        .map_err(|e| StoreError::Corrupt(format!("{}={:?}: {}", column, value, e)))
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{}={:?}: {}", column, value, e)))
}

fn parse_status(value: &str) -> Result<PositionStatus, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Repository;
    use crate::db::init_db;
    use tempfile::TempDir;

    pub async fn temp_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(db_path.to_str().unwrap())
            .await
            .expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }
}
