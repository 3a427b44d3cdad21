//! Static mapping from (contract, event signature) to a typed event shape,
//! built once at startup from JSON ABI definitions.

use crate::domain::Address;
use alloy_dyn_abi::DynSolType;
use alloy_json_abi::JsonAbi;
use alloy_primitives::B256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Name of the event that drives position lifecycle state.
pub const LIFECYCLE_EVENT: &str = "TroveUpdated";

/// What the pipeline does with a resolved event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Folded into position state (and recorded for audit).
    Lifecycle,
    /// Recorded for audit only.
    Audit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldShape {
    pub name: String,
    pub ty: DynSolType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventShape {
    pub name: String,
    pub kind: EventKind,
    /// Indexed fields in declaration order (topics 1..).
    pub indexed: Vec<FieldShape>,
    /// Non-indexed fields in declaration order (the data payload).
    pub data: Vec<FieldShape>,
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read ABI file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid ABI JSON in {path}: {reason}")]
    InvalidAbi { path: PathBuf, reason: String },
    #[error("event {event} field {field}: unsupported type {ty}: {reason}")]
    UnsupportedType {
        event: String,
        field: String,
        ty: String,
        reason: String,
    },
}

/// Decoding table keyed by (emitting contract, signature hash).
#[derive(Debug, Clone, Default)]
pub struct DecodingTable {
    shapes: HashMap<(Address, B256), EventShape>,
    contracts: Vec<Address>,
}

impl DecodingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one ABI file per contract.
    pub fn from_abi_files(entries: &[(Address, PathBuf)]) -> Result<Self, TableError> {
        let mut table = Self::new();
        for (contract, path) in entries {
            let abi = load_abi(path)?;
            let events = table.register_abi(contract.clone(), &abi)?;
            info!(contract = %contract, path = %path.display(), events, "Loaded ABI");
        }
        Ok(table)
    }

    /// Register every non-anonymous event of `abi` under `contract`.
    ///
    /// Returns the number of events registered.
    pub fn register_abi(&mut self, contract: Address, abi: &JsonAbi) -> Result<usize, TableError> {
        let mut count = 0;
        for event in abi.events() {
            if event.anonymous {
                continue;
            }

            let mut indexed = Vec::new();
            let mut data = Vec::new();
            for param in &event.inputs {
                let selector_type = param.selector_type();
                let ty = DynSolType::parse(&selector_type).map_err(|e| {
                    TableError::UnsupportedType {
                        event: event.name.clone(),
                        field: param.name.clone(),
                        ty: selector_type.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let field = FieldShape {
                    name: param.name.clone(),
                    ty,
                };
                if param.indexed {
                    indexed.push(field);
                } else {
                    data.push(field);
                }
            }

            let kind = if event.name == LIFECYCLE_EVENT {
                EventKind::Lifecycle
            } else {
                EventKind::Audit
            };

            self.shapes.insert(
                (contract.clone(), event.selector()),
                EventShape {
                    name: event.name.clone(),
                    kind,
                    indexed,
                    data,
                },
            );
            count += 1;
        }

        if !self.contracts.contains(&contract) {
            self.contracts.push(contract);
        }
        Ok(count)
    }

    /// Look up the shape for a log's emitting contract and first topic.
    pub fn resolve(&self, contract: &Address, signature: &B256) -> Option<&EventShape> {
        self.shapes.get(&(contract.clone(), *signature))
    }

    /// Contracts with a registered ABI, in registration order.
    pub fn contracts(&self) -> &[Address] {
        &self.contracts
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Parse an ABI file: either a bare ABI array or an artifact with an `abi` key.
fn load_abi(path: &Path) -> Result<JsonAbi, TableError> {
    let content = std::fs::read_to_string(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_abi(&content).map_err(|reason| TableError::InvalidAbi {
        path: path.to_path_buf(),
        reason,
    })
}

pub fn parse_abi(content: &str) -> Result<JsonAbi, String> {
    match serde_json::from_str::<JsonAbi>(content) {
        Ok(abi) => Ok(abi),
        Err(direct_err) => {
            let artifact: serde_json::Value =
                serde_json::from_str(content).map_err(|e| e.to_string())?;
            match artifact.get("abi") {
                Some(abi) => serde_json::from_value(abi.clone()).map_err(|e| e.to_string()),
                None => Err(direct_err.to_string()),
            }
        }
    }
}
