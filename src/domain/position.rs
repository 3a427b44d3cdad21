//! Materialized position state and its audit history.

use super::{Address, Decimal, LifecycleOperation, TxHash};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Active => "active",
            PositionStatus::Closed => "closed",
            PositionStatus::Liquidated => "liquidated",
        }
    }

    /// Closed and liquidated positions are never mutated again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Active)
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PositionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PositionStatus::Active),
            "closed" => Ok(PositionStatus::Closed),
            "liquidated" => Ok(PositionStatus::Liquidated),
            other => Err(format!("unknown position status: {}", other)),
        }
    }
}

/// One immutable audit record of a lifecycle event applied to a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub tx_hash: TxHash,
    /// Log index within the block; with `tx_hash` it identifies the event.
    pub log_index: u64,
    pub coll: Decimal,
    pub debt: Decimal,
    pub operation: LifecycleOperation,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
}

/// Mutable fields of a position, replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionState {
    pub coll: Decimal,
    pub debt: Decimal,
    pub health_ratio: Decimal,
    pub status: PositionStatus,
    pub block_number: u64,
}

/// Current materialized state for one (wallet, asset) lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub position_id: i64,
    pub wallet: Address,
    pub asset: Address,
    pub coll: Decimal,
    pub debt: Decimal,
    pub health_ratio: Decimal,
    pub status: PositionStatus,
    pub block_number: u64,
    /// Chronological; append-only.
    pub history: Vec<HistoryEntry>,
}

impl Position {
    pub fn state(&self) -> PositionState {
        PositionState {
            coll: self.coll,
            debt: self.debt,
            health_ratio: self.health_ratio,
            status: self.status,
            block_number: self.block_number,
        }
    }

    /// Replace mutable fields and append the entry that produced them.
    pub fn apply(&mut self, state: PositionState, entry: HistoryEntry) {
        self.coll = state.coll;
        self.debt = state.debt;
        self.health_ratio = state.health_ratio;
        self.status = state.status;
        self.block_number = state.block_number;
        self.history.push(entry);
    }
}
