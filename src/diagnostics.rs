//! Contract and event-signature survey over a block range.
//!
//! Used by the `diagnose` binary to check that the configured contracts are
//! deployed and that the signatures they emit are covered by the loaded ABIs.

use crate::decode::DecodingTable;
use crate::domain::{Address, LogEntry};
use crate::ledger::LedgerClient;
use crate::orchestration::{FetchError, LogFetcher};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// Deployed code smaller than this is most likely a proxy.
pub const PROXY_CODE_THRESHOLD: usize = 1000;

/// Bytecode size of one contract, or why it could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCode {
    pub address: Address,
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContractCode {
    pub fn is_likely_proxy(&self) -> bool {
        matches!(self.size, Some(size) if size > 0 && size < PROXY_CODE_THRESHOLD)
    }
}

/// Logs sharing one `topics[0]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSummary {
    /// Hex signature, `None` for anonymous logs without topics.
    pub signature: Option<String>,
    pub count: usize,
    /// Emitting contracts in order of first appearance.
    pub emitters: Vec<Address>,
    /// Event name if any emitter's ABI declares the signature.
    pub event: Option<String>,
}

impl SignatureSummary {
    pub fn is_resolved(&self) -> bool {
        self.event.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSurvey {
    pub from: u64,
    pub to: u64,
    pub total_logs: usize,
    pub signatures: Vec<SignatureSummary>,
}

impl RangeSurvey {
    pub fn unresolved(&self) -> impl Iterator<Item = &SignatureSummary> {
        self.signatures.iter().filter(|s| !s.is_resolved())
    }
}

/// Read the code size of every address. Failures are reported per contract.
pub async fn inspect_contracts(client: &dyn LedgerClient, addresses: &[Address]) -> Vec<ContractCode> {
    let mut contracts = Vec::with_capacity(addresses.len());
    for address in addresses {
        let code = match client.code_size(address).await {
            Ok(size) => ContractCode {
                address: address.clone(),
                size: Some(size),
                error: None,
            },
            Err(e) => {
                warn!(%address, error = %e, "Failed to read contract code");
                ContractCode {
                    address: address.clone(),
                    size: None,
                    error: Some(e.to_string()),
                }
            }
        };
        contracts.push(code);
    }
    contracts
}

/// Fetch `[from, to]` for the fetcher's contracts and group the logs by
/// signature.
///
/// # Errors
/// Returns the fetch error if the range cannot be read.
pub async fn survey(
    fetcher: &LogFetcher,
    table: &DecodingTable,
    from: u64,
    to: u64,
) -> Result<RangeSurvey, FetchError> {
    let logs = fetcher.fetch(from, to).await?;
    Ok(RangeSurvey {
        from,
        to,
        total_logs: logs.len(),
        signatures: summarize_signatures(&logs, table),
    })
}

/// Group logs by `topics[0]`, most frequent first.
pub fn summarize_signatures(logs: &[LogEntry], table: &DecodingTable) -> Vec<SignatureSummary> {
    let mut summaries: Vec<SignatureSummary> = Vec::new();
    let mut slots: HashMap<Option<String>, usize> = HashMap::new();

    for log in logs {
        let signature = log.topics.first();
        let key = signature.map(|s| s.to_string());
        let slot = *slots.entry(key.clone()).or_insert_with(|| {
            summaries.push(SignatureSummary {
                signature: key,
                count: 0,
                emitters: Vec::new(),
                event: None,
            });
            summaries.len() - 1
        });

        let summary = &mut summaries[slot];
        summary.count += 1;
        if !summary.emitters.contains(&log.address) {
            summary.emitters.push(log.address.clone());
        }
        if summary.event.is_none() {
            summary.event = signature
                .and_then(|s| table.resolve(&log.address, s))
                .map(|shape| shape.name.clone());
        }
    }

    // Stable: ties keep first-appearance order.
    summaries.sort_by(|a, b| b.count.cmp(&a.count));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::table::parse_abi;
    use crate::domain::TxHash;
    use crate::ledger::MockLedger;
    use alloy_primitives::{keccak256, B256};
    use std::sync::Arc;

    const TROVE_MANAGER_ABI: &str = include_str!("../abi/TroveManager.json");
    const TROVE_UPDATED: &str = "TroveUpdated(address,address,uint256,uint256,uint256,uint8)";

    fn manager() -> Address {
        Address::new("0x00000000000000000000000000000000000000aa")
    }

    fn stranger() -> Address {
        Address::new("0x00000000000000000000000000000000000000bb")
    }

    fn log(address: Address, block_number: u64, topic: Option<B256>) -> LogEntry {
        LogEntry {
            address,
            topics: topic.into_iter().collect(),
            data: vec![],
            tx_hash: TxHash::new(format!("0x{:x}", block_number)),
            block_number,
            log_index: 0,
        }
    }

    fn table() -> DecodingTable {
        let mut table = DecodingTable::new();
        table
            .register_abi(manager(), &parse_abi(TROVE_MANAGER_ABI).unwrap())
            .unwrap();
        table
    }

    #[test]
    fn test_signatures_grouped_and_flagged() {
        let trove = keccak256(TROVE_UPDATED);
        let transfer = keccak256("Transfer(address,address,uint256)");
        let logs = vec![
            log(stranger(), 1, Some(transfer)),
            log(manager(), 2, Some(trove)),
            log(stranger(), 3, Some(trove)),
            log(manager(), 4, Some(trove)),
            log(manager(), 5, None),
        ];

        let summaries = summarize_signatures(&logs, &table());
        assert_eq!(summaries.len(), 3);

        assert_eq!(summaries[0].signature, Some(trove.to_string()));
        assert_eq!(summaries[0].count, 3);
        assert_eq!(summaries[0].emitters, vec![manager(), stranger()]);
        assert_eq!(summaries[0].event.as_deref(), Some("TroveUpdated"));

        assert_eq!(summaries[1].signature, Some(transfer.to_string()));
        assert!(!summaries[1].is_resolved());
        assert_eq!(summaries[2].signature, None);
        assert!(!summaries[2].is_resolved());
    }

    #[test]
    fn test_signature_unresolved_on_unregistered_contract() {
        let trove = keccak256(TROVE_UPDATED);
        let summaries = summarize_signatures(&[log(stranger(), 1, Some(trove))], &table());
        assert_eq!(summaries[0].event, None);
    }

    #[tokio::test]
    async fn test_survey_over_range() {
        let trove = keccak256(TROVE_UPDATED);
        let unknown = keccak256("Paused()");
        let ledger = MockLedger::new()
            .with_head(100)
            .with_log(log(manager(), 10, Some(trove)))
            .with_log(log(manager(), 11, Some(unknown)))
            .with_log(log(manager(), 50, Some(trove)));
        let fetcher = LogFetcher::new(Arc::new(ledger), vec![manager()]);

        let report = survey(&fetcher, &table(), 0, 20).await.unwrap();
        assert_eq!(report.total_logs, 2);
        let unresolved: Vec<_> = report.unresolved().collect();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].signature, Some(unknown.to_string()));

        assert!(matches!(
            survey(&fetcher, &table(), 5, 4).await,
            Err(FetchError::InvalidRange { from: 5, to: 4 })
        ));
    }

    #[tokio::test]
    async fn test_inspect_contracts_flags_proxies() {
        let ledger = MockLedger::new()
            .with_code(manager(), 24_000)
            .with_code(stranger(), 180);
        let missing = Address::new("0x00000000000000000000000000000000000000cc");

        let contracts = inspect_contracts(&ledger, &[manager(), stranger(), missing]).await;
        assert_eq!(contracts[0].size, Some(24_000));
        assert!(!contracts[0].is_likely_proxy());
        assert!(contracts[1].is_likely_proxy());
        assert_eq!(contracts[2].size, Some(0));
        assert!(!contracts[2].is_likely_proxy());
    }
}
