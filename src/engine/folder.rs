use crate::domain::{
    Address, Decimal, DomainEvent, EventPayload, FixedPointError, HistoryEntry,
    LifecycleOperation, Position, PositionState, PositionStatus, TxHash,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Decimal scale used for amounts of assets without an explicit entry.
pub const DEFAULT_DECIMALS: u32 = 18;

/// Per-asset decimal scale for converting raw fixed-point amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalScales {
    default: u32,
    per_asset: HashMap<Address, u32>,
}

impl DecimalScales {
    pub fn new(default: u32) -> Self {
        Self {
            default,
            per_asset: HashMap::new(),
        }
    }

    pub fn with_asset(mut self, asset: Address, decimals: u32) -> Self {
        self.per_asset.insert(asset, decimals);
        self
    }

    pub fn for_asset(&self, asset: &Address) -> u32 {
        self.per_asset.get(asset).copied().unwrap_or(self.default)
    }
}

impl Default for DecimalScales {
    fn default() -> Self {
        Self::new(DEFAULT_DECIMALS)
    }
}

/// A lifecycle event reduced to the values the fold needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub wallet: Address,
    pub asset: Address,
    pub coll: Decimal,
    pub debt: Decimal,
    pub operation: LifecycleOperation,
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub block_number: u64,
}

impl Observation {
    pub fn health_ratio(&self) -> Decimal {
        Decimal::health_ratio(self.debt, self.coll)
    }

    /// Status after applying this observation to an existing position.
    pub fn resulting_status(&self) -> PositionStatus {
        if self.operation == LifecycleOperation::Closed {
            PositionStatus::Closed
        } else if self.debt.is_zero() {
            PositionStatus::Liquidated
        } else {
            PositionStatus::Active
        }
    }

    fn history_entry(&self, timestamp: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            tx_hash: self.tx_hash.clone(),
            log_index: self.log_index,
            coll: self.coll,
            debt: self.debt,
            operation: self.operation,
            timestamp,
            block_number: self.block_number,
        }
    }
}

/// The mutation a lifecycle event produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldOutcome {
    /// A new position, created by an `Opened` operation.
    Insert(Position),
    /// New state for the most recent position of the pair.
    Update {
        position_id: i64,
        state: PositionState,
        entry: HistoryEntry,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FoldError {
    #[error("no position for wallet={wallet} asset={asset}")]
    PositionNotFound { wallet: Address, asset: Address },
    #[error("position {position_id} is already {status}")]
    PositionTerminal {
        position_id: i64,
        status: PositionStatus,
    },
    #[error("wallet={wallet} asset={asset} already has active position {position_id}")]
    ActivePositionExists {
        position_id: i64,
        wallet: Address,
        asset: Address,
    },
    #[error("invalid amount: {0}")]
    Amount(#[from] FixedPointError),
}

/// Folds lifecycle events into position state. Pure: persistence is the
/// caller's job.
#[derive(Debug, Clone, Default)]
pub struct PositionFolder {
    scales: DecimalScales,
}

impl PositionFolder {
    pub fn new(scales: DecimalScales) -> Self {
        Self { scales }
    }

    /// Extract the fold inputs from a lifecycle event.
    ///
    /// Returns `Ok(None)` for events that do not affect positions.
    pub fn observe(&self, event: &DomainEvent) -> Result<Option<Observation>, FoldError> {
        let EventPayload::TroveUpdated(trove) = &event.payload else {
            return Ok(None);
        };

        let wallet = event.indexed_address(0);
        let asset = event.indexed_address(1);
        let scale = self.scales.for_asset(&asset);

        Ok(Some(Observation {
            coll: Decimal::from_fixed_point(trove.coll, scale)?,
            debt: Decimal::from_fixed_point(trove.debt, scale)?,
            operation: trove.operation,
            wallet,
            asset,
            tx_hash: event.tx_hash.clone(),
            log_index: event.log_index,
            block_number: event.block_number,
        }))
    }

    /// Apply an observation to the latest position of its (wallet, asset)
    /// pair.
    ///
    /// `next_id` is only used when a position is created.
    pub fn fold(
        &self,
        obs: &Observation,
        latest: Option<&Position>,
        next_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<FoldOutcome, FoldError> {
        let entry = obs.history_entry(timestamp);

        if obs.operation == LifecycleOperation::Opened {
            if let Some(existing) = latest.filter(|p| p.status == PositionStatus::Active) {
                return Err(FoldError::ActivePositionExists {
                    position_id: existing.position_id,
                    wallet: obs.wallet.clone(),
                    asset: obs.asset.clone(),
                });
            }
            return Ok(FoldOutcome::Insert(Position {
                position_id: next_id,
                wallet: obs.wallet.clone(),
                asset: obs.asset.clone(),
                coll: obs.coll,
                debt: obs.debt,
                health_ratio: obs.health_ratio(),
                status: PositionStatus::Active,
                block_number: obs.block_number,
                history: vec![entry],
            }));
        }

        let existing = latest.ok_or_else(|| FoldError::PositionNotFound {
            wallet: obs.wallet.clone(),
            asset: obs.asset.clone(),
        })?;
        if existing.status.is_terminal() {
            return Err(FoldError::PositionTerminal {
                position_id: existing.position_id,
                status: existing.status,
            });
        }

        Ok(FoldOutcome::Update {
            position_id: existing.position_id,
            state: PositionState {
                coll: obs.coll,
                debt: obs.debt,
                health_ratio: obs.health_ratio(),
                status: obs.resulting_status(),
                block_number: obs.block_number,
            },
            entry,
        })
    }
}

/// In-memory position store driven by the folder.
///
/// Mirrors what the repository persists; used to replay event sequences
/// without a database.
#[derive(Debug, Default)]
pub struct PositionBook {
    folder: PositionFolder,
    positions: Vec<Position>,
}

impl PositionBook {
    pub fn new(folder: PositionFolder) -> Self {
        Self {
            folder,
            positions: Vec::new(),
        }
    }

    /// Fold one event. Returns `Ok(false)` for events that do not affect
    /// positions.
    pub fn apply(&mut self, event: &DomainEvent, timestamp: DateTime<Utc>) -> Result<bool, FoldError> {
        let Some(obs) = self.folder.observe(event)? else {
            return Ok(false);
        };
        let next_id = self.positions.last().map(|p| p.position_id + 1).unwrap_or(1);
        let outcome = self
            .folder
            .fold(&obs, self.latest(&obs.wallet, &obs.asset), next_id, timestamp)?;

        match outcome {
            FoldOutcome::Insert(position) => self.positions.push(position),
            FoldOutcome::Update {
                position_id,
                state,
                entry,
            } => {
                if let Some(position) = self
                    .positions
                    .iter_mut()
                    .find(|p| p.position_id == position_id)
                {
                    position.apply(state, entry);
                }
            }
        }
        Ok(true)
    }

    /// Most recently created position for the pair, regardless of status.
    pub fn latest(&self, wallet: &Address, asset: &Address) -> Option<&Position> {
        self.positions
            .iter()
            .rev()
            .find(|p| &p.wallet == wallet && &p.asset == asset)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn into_positions(self) -> Vec<Position> {
        self.positions
    }
}
