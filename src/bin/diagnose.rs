//! Survey the watched contracts over a block range: bytecode sizes and the
//! event signatures they emit, flagging signatures no loaded ABI declares.

use anyhow::Context;
use clap::Parser;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use trove_indexer::config::parse_contract_abis;
use trove_indexer::decode::DecodingTable;
use trove_indexer::diagnostics::{inspect_contracts, survey};
use trove_indexer::domain::Address;
use trove_indexer::ledger::JsonRpcLedger;
use trove_indexer::orchestration::LogFetcher;

#[derive(Parser)]
#[command(
    name = "diagnose",
    about = "Check contract deployment and event signature coverage over a block range"
)]
struct Cli {
    /// Ledger JSON-RPC endpoint
    #[arg(long, env = "RPC_URL")]
    rpc_url: String,
    /// `0xaddr=path/to/abi.json` pairs, comma separated
    #[arg(long, env = "CONTRACT_ABIS")]
    contract_abis: String,
    /// Extra contract to survey (repeatable)
    #[arg(long = "address")]
    addresses: Vec<String>,
    /// First block of the range
    #[arg(long)]
    from: u64,
    /// Last block of the range
    #[arg(long)]
    to: u64,
    #[arg(long, env = "RPC_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let contract_abis = parse_contract_abis(&cli.contract_abis).context("Invalid CONTRACT_ABIS")?;
    let table = DecodingTable::from_abi_files(&contract_abis)
        .context("Failed to load contract ABIs")?;

    let mut addresses: Vec<Address> = contract_abis.iter().map(|(a, _)| a.clone()).collect();
    for raw in &cli.addresses {
        let address = Address::from_str(raw).with_context(|| format!("Invalid --address {}", raw))?;
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }

    let ledger = Arc::new(
        JsonRpcLedger::new(cli.rpc_url, Duration::from_millis(cli.timeout_ms))
            .context("Failed to build RPC client")?,
    );

    let contracts = inspect_contracts(&*ledger, &addresses).await;
    let fetcher = LogFetcher::new(ledger, addresses);
    let report = survey(&fetcher, &table, cli.from, cli.to)
        .await
        .with_context(|| format!("Failed to fetch logs for [{}, {}]", cli.from, cli.to))?;

    if cli.json {
        let output = serde_json::json!({ "contracts": contracts, "survey": report });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("=== Contracts ===");
    for contract in &contracts {
        match (contract.size, &contract.error) {
            (Some(size), _) => {
                println!("{}: {} bytes", contract.address, size);
                if size == 0 {
                    println!("  ^ no code deployed");
                } else if contract.is_likely_proxy() {
                    println!("  ^ likely a proxy (small bytecode)");
                }
            }
            (None, Some(error)) => println!("{}: error reading code: {}", contract.address, error),
            (None, None) => println!("{}: unknown", contract.address),
        }
    }

    println!(
        "\n=== Signatures in blocks {}-{} ({} logs) ===",
        report.from, report.to, report.total_logs
    );
    for summary in &report.signatures {
        let emitters: Vec<&str> = summary.emitters.iter().map(|a| a.as_str()).collect();
        println!(
            "{} {}: {} logs from [{}]{}",
            if summary.is_resolved() { " " } else { "!" },
            summary.signature.as_deref().unwrap_or("<no topics>"),
            summary.count,
            emitters.join(", "),
            summary
                .event
                .as_deref()
                .map(|name| format!(" ({})", name))
                .unwrap_or_default()
        );
    }

    let unresolved = report.unresolved().count();
    if unresolved > 0 {
        println!("\n{} signature(s) not declared by any loaded ABI", unresolved);
    }
    Ok(())
}
