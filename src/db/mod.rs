//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - The persistence gateway for positions, raw events, and checkpoints

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{
    ActiveTotals, CachedPrice, EventOutcome, PositionFilter, RawEventRecord, Repository, StatusFilter,
    StoreError,
};
