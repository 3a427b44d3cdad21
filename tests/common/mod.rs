#![allow(dead_code)]

use alloy_primitives::{keccak256, B256, U256};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trove_indexer::db::init_db;
use trove_indexer::decode::table::parse_abi;
use trove_indexer::decode::{DecodingTable, EventDecoder};
use trove_indexer::domain::{Address, LogEntry, TxHash};
use trove_indexer::engine::PositionFolder;
use trove_indexer::ledger::MockLedger;
use trove_indexer::orchestration::{LogFetcher, Pipeline, Scheduler, SchedulerConfig};
use trove_indexer::Repository;

pub const TROVE_MANAGER_ABI: &str = include_str!("../../abi/TroveManager.json");
pub const BORROWER_OPERATIONS_ABI: &str = include_str!("../../abi/BorrowerOperations.json");

pub const TROVE_UPDATED: &str = "TroveUpdated(address,address,uint256,uint256,uint256,uint8)";

pub const OPEN: u8 = 0;
pub const CLOSE: u8 = 1;
pub const ADJUST: u8 = 2;

pub fn trove_manager() -> Address {
    Address::new("0xe5d2644be06c5b5d48b42aa7f9eaf27f0bc84265")
}

pub fn borrower_operations() -> Address {
    Address::new("0x165fb19121ab4f74dc66c520866b9ef4eb86aff8")
}

/// Topic word carrying an address whose last byte is `last`.
pub fn address_topic(last: u8) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[31] = last;
    B256::from(bytes)
}

pub fn address_of(last: u8) -> Address {
    Address::from_topic(&address_topic(last))
}

/// `n` whole tokens at 18 decimals.
pub fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}

/// A `TroveUpdated` log from the trove manager.
#[allow(clippy::too_many_arguments)]
pub fn trove_updated(
    block_number: u64,
    log_index: u64,
    wallet: u8,
    asset: u8,
    coll: U256,
    debt: U256,
    operation: u8,
) -> LogEntry {
    let words = [debt, coll, coll, U256::from(operation)];
    LogEntry {
        address: trove_manager(),
        topics: vec![
            keccak256(TROVE_UPDATED),
            address_topic(wallet),
            address_topic(asset),
        ],
        data: words.iter().flat_map(|w| w.to_be_bytes::<32>()).collect(),
        tx_hash: TxHash::new(format!("0x{:08x}{:04x}", block_number, log_index)),
        block_number,
        log_index,
    }
}

/// A log whose signature is not in any registered ABI.
pub fn unknown_log(block_number: u64, log_index: u64) -> LogEntry {
    LogEntry {
        address: trove_manager(),
        topics: vec![keccak256("Transfer(address,address,uint256)")],
        data: U256::from(1u64).to_be_bytes::<32>().to_vec(),
        tx_hash: TxHash::new(format!("0x{:08x}{:04x}", block_number, log_index)),
        block_number,
        log_index,
    }
}

pub fn decoding_table() -> DecodingTable {
    let mut table = DecodingTable::new();
    table
        .register_abi(trove_manager(), &parse_abi(TROVE_MANAGER_ABI).unwrap())
        .unwrap();
    table
        .register_abi(
            borrower_operations(),
            &parse_abi(BORROWER_OPERATIONS_ABI).unwrap(),
        )
        .unwrap();
    table
}

pub async fn setup_repo() -> (Arc<Repository>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    (Arc::new(Repository::new(pool)), temp_dir)
}

pub fn pipeline(repo: Arc<Repository>) -> Pipeline {
    Pipeline::new(
        EventDecoder::new(Arc::new(decoding_table())),
        PositionFolder::default(),
        repo,
    )
}

pub fn scheduler_config(start_block: u64, batch_size: u64) -> SchedulerConfig {
    SchedulerConfig {
        indexer_id: "test-indexer".to_string(),
        start_block,
        batch_size,
        poll_interval: Duration::from_millis(1),
        retry_interval: Duration::from_millis(1),
    }
}

pub async fn scheduler(
    ledger: Arc<MockLedger>,
    repo: Arc<Repository>,
    config: SchedulerConfig,
) -> Scheduler {
    let fetcher = LogFetcher::new(ledger, vec![trove_manager(), borrower_operations()]);
    Scheduler::start(fetcher, pipeline(repo.clone()), repo, config)
        .await
        .expect("scheduler start failed")
}
