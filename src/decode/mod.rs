//! ABI-driven decoding of raw ledger logs.
//!
//! - `table` - the static (contract, signature) -> event shape lookup
//! - `decoder` - unpacks a raw log into a typed `DomainEvent`

pub mod decoder;
pub mod table;

pub use decoder::{DecodeError, EventDecoder};
pub use table::{DecodingTable, EventKind, EventShape, TableError, LIFECYCLE_EVENT};
