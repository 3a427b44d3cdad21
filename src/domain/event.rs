//! Raw ledger logs and the typed events decoded from them.

use super::{Address, LogPosition, TxHash};
use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

/// One raw log entry as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// ABI-encoded non-indexed fields.
    pub data: Vec<u8>,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
}

impl LogEntry {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block_number, self.log_index)
    }
}

/// Lifecycle operation code carried by `TroveUpdated`.
///
/// Serialized as its history label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleOperation {
    Opened,
    Closed,
    Adjusted,
    Unknown(u8),
}

impl LifecycleOperation {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => LifecycleOperation::Opened,
            1 => LifecycleOperation::Closed,
            2 => LifecycleOperation::Adjusted,
            other => LifecycleOperation::Unknown(other),
        }
    }

    /// Label stored in history entries.
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleOperation::Opened => "openTrove",
            LifecycleOperation::Closed => "closeTrove",
            LifecycleOperation::Adjusted => "adjustTrove",
            LifecycleOperation::Unknown(_) => "unknown",
        }
    }

    /// Inverse of [`label`](Self::label). Unknown codes are not recoverable
    /// from the label, so they map back to `Unknown(u8::MAX)`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "openTrove" => LifecycleOperation::Opened,
            "closeTrove" => LifecycleOperation::Closed,
            "adjustTrove" => LifecycleOperation::Adjusted,
            _ => LifecycleOperation::Unknown(u8::MAX),
        }
    }
}

impl Serialize for LifecycleOperation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for LifecycleOperation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(LifecycleOperation::from_label(&label))
    }
}

impl std::fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Payload of the lifecycle event. Amounts are raw fixed-point integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TroveUpdated {
    pub coll: U256,
    pub debt: U256,
    /// Present only if the schema declares a stake field.
    pub stake: Option<U256>,
    pub operation: LifecycleOperation,
}

/// Strongly-typed payload, selected by the signature lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    TroveUpdated(TroveUpdated),
    /// Any other event in the decoding table; kept for the audit trail only.
    Other {
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

/// A decoded occurrence. Immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    pub name: String,
    pub contract: Address,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
    /// Indexed topic values after the signature, in declaration order.
    /// May be shorter than the schema declares.
    pub indexed: Vec<B256>,
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.block_number, self.log_index)
    }

    /// Address carried by the n-th indexed topic (0-based, signature
    /// excluded), or the empty address if the log has fewer topics.
    pub fn indexed_address(&self, n: usize) -> Address {
        self.indexed
            .get(n)
            .map(Address::from_topic)
            .unwrap_or_else(Address::empty)
    }

    /// Decoded fields as JSON for the raw audit trail.
    pub fn fields_json(&self) -> serde_json::Value {
        match &self.payload {
            EventPayload::TroveUpdated(t) => {
                let mut fields = serde_json::json!({
                    "coll": t.coll.to_string(),
                    "debt": t.debt.to_string(),
                    "operation": t.operation.label(),
                });
                if let Some(stake) = t.stake {
                    fields["stake"] = serde_json::Value::String(stake.to_string());
                }
                fields
            }
            EventPayload::Other { fields } => serde_json::Value::Object(fields.clone()),
        }
    }
}
