//! Pure computation engine for position lifecycle state.

pub mod folder;

pub use folder::{
    DecimalScales, FoldError, FoldOutcome, Observation, PositionBook, PositionFolder,
    DEFAULT_DECIMALS,
};
