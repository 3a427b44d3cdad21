pub mod api;
pub mod config;
pub mod db;
pub mod decode;
pub mod diagnostics;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod orchestration;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Address, Decimal, DomainEvent, LogEntry, Position, PositionStatus, TxHash};
pub use error::AppError;
