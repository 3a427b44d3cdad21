//! Domain types for the position indexer.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: Address, TxHash, LogPosition
//! - Raw log entries and decoded, typed domain events
//! - Position, PositionState and HistoryEntry

pub mod decimal;
pub mod event;
pub mod position;
pub mod primitives;

pub use decimal::{Decimal, FixedPointError};
pub use event::{DomainEvent, EventPayload, LifecycleOperation, LogEntry, TroveUpdated};
pub use position::{HistoryEntry, Position, PositionState, PositionStatus};
pub use primitives::{Address, AddressParseError, LogPosition, TxHash};
