//! Domain primitives: Address, TxHash, LogPosition.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Ledger address, stored as lowercase `0x`-prefixed hex.
///
/// The empty address stands for "not present in the log" (e.g. a log with
/// fewer indexed topics than the schema declares).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an Address from a string, normalizing to lowercase.
    pub fn new(addr: impl Into<String>) -> Self {
        Address(addr.into().trim().to_lowercase())
    }

    /// The empty address.
    pub fn empty() -> Self {
        Address(String::new())
    }

    /// Address carried in the low 20 bytes of an indexed topic word.
    pub fn from_topic(topic: &B256) -> Self {
        Address(format!("0x{}", hex::encode(&topic.as_slice()[12..])))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the address as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid address: {0}")]
pub struct AddressParseError(pub String);

impl FromStr for Address {
    type Err = AddressParseError;

    /// Strict parse: `0x` followed by 40 hex characters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressParseError(s.to_string()));
        }
        Ok(Address::new(trimmed))
    }
}

/// Transaction hash (lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(hash: impl Into<String>) -> Self {
        TxHash(hash.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a log in the chain: the total order events are folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}
