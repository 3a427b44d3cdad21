//! Converts raw log entries into typed domain events.

use super::table::{DecodingTable, EventKind, EventShape, FieldShape};
use crate::domain::{DomainEvent, EventPayload, LifecycleOperation, LogEntry, TroveUpdated};
use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// A resolved event whose payload could not be unpacked.
///
/// Per-event condition: the caller skips the event and keeps going.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{event}: payload does not match schema: {reason}")]
    Payload { event: String, reason: String },
    #[error("{event}: missing field {field}")]
    MissingField { event: String, field: String },
    #[error("{event}: field {field} has unexpected value {found}")]
    FieldType {
        event: String,
        field: String,
        found: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventDecoder {
    table: Arc<DecodingTable>,
}

impl EventDecoder {
    pub fn new(table: Arc<DecodingTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &DecodingTable {
        &self.table
    }

    /// Decode one log.
    ///
    /// Returns `Ok(None)` when the (contract, signature) pair is not in the
    /// table; that is not an error.
    pub fn decode(&self, log: &LogEntry) -> Result<Option<DomainEvent>, DecodeError> {
        let Some(signature) = log.topics.first() else {
            return Ok(None);
        };
        let Some(shape) = self.table.resolve(&log.address, signature) else {
            return Ok(None);
        };

        let values = decode_payload(shape, &log.data)?;
        let payload = match shape.kind {
            EventKind::Lifecycle => {
                EventPayload::TroveUpdated(trove_updated(&shape.name, &shape.data, values)?)
            }
            EventKind::Audit => EventPayload::Other {
                fields: audit_fields(shape, &log.topics[1..], values),
            },
        };

        Ok(Some(DomainEvent {
            name: shape.name.clone(),
            contract: log.address.clone(),
            tx_hash: log.tx_hash.clone(),
            block_number: log.block_number,
            log_index: log.log_index,
            indexed: log.topics[1..].to_vec(),
            payload,
        }))
    }
}

fn decode_payload(shape: &EventShape, data: &[u8]) -> Result<Vec<DynSolValue>, DecodeError> {
    if shape.data.is_empty() {
        return Ok(Vec::new());
    }

    let tuple = DynSolType::Tuple(shape.data.iter().map(|f| f.ty.clone()).collect());
    let decoded = tuple
        .abi_decode_sequence(data)
        .map_err(|e| DecodeError::Payload {
            event: shape.name.clone(),
            reason: e.to_string(),
        })?;

    let values = match decoded {
        DynSolValue::Tuple(values) => values,
        other => vec![other],
    };
    if values.len() != shape.data.len() {
        return Err(DecodeError::Payload {
            event: shape.name.clone(),
            reason: format!("expected {} fields, got {}", shape.data.len(), values.len()),
        });
    }
    Ok(values)
}

/// Field name without Solidity's leading underscore, lowercased.
fn canonical_name(name: &str) -> String {
    name.trim_start_matches('_').to_lowercase()
}

fn find_field<'a>(
    fields: &[FieldShape],
    values: &'a [DynSolValue],
    aliases: &[&str],
) -> Option<&'a DynSolValue> {
    fields
        .iter()
        .position(|f| aliases.contains(&canonical_name(&f.name).as_str()))
        .and_then(|i| values.get(i))
}

fn uint_field(
    event: &str,
    fields: &[FieldShape],
    values: &[DynSolValue],
    aliases: &[&str],
) -> Result<Option<U256>, DecodeError> {
    match find_field(fields, values, aliases) {
        None => Ok(None),
        Some(DynSolValue::Uint(value, _)) => Ok(Some(*value)),
        Some(other) => Err(DecodeError::FieldType {
            event: event.to_string(),
            field: aliases[0].to_string(),
            found: format!("{:?}", other),
        }),
    }
}

fn required_uint(
    event: &str,
    fields: &[FieldShape],
    values: &[DynSolValue],
    aliases: &[&str],
) -> Result<U256, DecodeError> {
    uint_field(event, fields, values, aliases)?.ok_or_else(|| DecodeError::MissingField {
        event: event.to_string(),
        field: aliases[0].to_string(),
    })
}

fn trove_updated(
    event: &str,
    fields: &[FieldShape],
    values: Vec<DynSolValue>,
) -> Result<TroveUpdated, DecodeError> {
    let coll = required_uint(event, fields, &values, &["coll", "collateral"])?;
    let debt = required_uint(event, fields, &values, &["debt"])?;
    let stake = uint_field(event, fields, &values, &["stake"])?;
    let op_raw = required_uint(event, fields, &values, &["operation", "op"])?;
    let op_code = u8::try_from(op_raw).map_err(|_| DecodeError::FieldType {
        event: event.to_string(),
        field: "operation".to_string(),
        found: op_raw.to_string(),
    })?;

    Ok(TroveUpdated {
        coll,
        debt,
        stake,
        operation: LifecycleOperation::from_code(op_code),
    })
}

fn audit_fields(
    shape: &EventShape,
    topics: &[alloy_primitives::B256],
    values: Vec<DynSolValue>,
) -> Map<String, Value> {
    let mut fields = Map::new();
    for (field, topic) in shape.indexed.iter().zip(topics) {
        // Reference types are stored hashed in topics; only the hash is recoverable.
        let value = match field.ty.abi_decode(topic.as_slice()) {
            Ok(v) if is_value_type(&field.ty) => to_json(v),
            _ => Value::String(format!("0x{}", hex::encode(topic.as_slice()))),
        };
        fields.insert(field.name.clone(), value);
    }
    for (field, value) in shape.data.iter().zip(values) {
        fields.insert(field.name.clone(), to_json(value));
    }
    fields
}

fn is_value_type(ty: &DynSolType) -> bool {
    matches!(
        ty,
        DynSolType::Bool
            | DynSolType::Int(_)
            | DynSolType::Uint(_)
            | DynSolType::FixedBytes(_)
            | DynSolType::Address
    )
}

/// Render a decoded ABI value as JSON. Integers become decimal strings so
/// 256-bit values survive.
fn to_json(value: DynSolValue) -> Value {
    #[allow(unreachable_patterns)]
    match value {
        DynSolValue::Bool(b) => Value::Bool(b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(bytes, size) => {
            Value::String(format!("0x{}", hex::encode(&bytes.as_slice()[..size])))
        }
        DynSolValue::Address(a) => Value::String(format!("0x{}", hex::encode(a.as_slice()))),
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => Value::String(s),
        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) | DynSolValue::Tuple(vals) => {
            Value::Array(vals.into_iter().map(to_json).collect())
        }
        _ => Value::Null,
    }
}
