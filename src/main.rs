use anyhow::Context;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use trove_indexer::decode::{DecodingTable, EventDecoder};
use trove_indexer::engine::PositionFolder;
use trove_indexer::ledger::JsonRpcLedger;
use trove_indexer::oracle::{OracleReader, RpcPriceSource};
use trove_indexer::orchestration::{LogFetcher, Pipeline, Scheduler};
use trove_indexer::{api, config::Config, db::init_db, Repository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;
    let port = config.port;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("Failed to initialize database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));

    let table = DecodingTable::from_abi_files(&config.contract_abis)
        .context("Failed to load contract ABIs")?;
    tracing::info!(
        contracts = table.contracts().len(),
        events = table.len(),
        "Decoding table loaded"
    );

    let ledger = Arc::new(
        JsonRpcLedger::new(config.rpc_url.clone(), config.rpc_timeout)
            .context("Failed to build RPC client")?,
    );
    let fetcher = LogFetcher::new(ledger.clone(), config.watched_contracts());
    let pipeline = Pipeline::new(
        EventDecoder::new(Arc::new(table)),
        PositionFolder::new(config.decimal_scales()),
        repo.clone(),
    );
    let scheduler = Scheduler::start(fetcher, pipeline, repo.clone(), config.scheduler_config())
        .await
        .context("Failed to start scheduler")?;

    let oracle = config.price_feed.clone().map(|feed| {
        let source = Arc::new(RpcPriceSource::new(ledger.clone(), feed, config.price_decimals));
        Arc::new(OracleReader::new(source, repo.clone()))
    });

    let app = api::create_router(api::AppState::new(repo, oracle));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);

    let mut indexer = tokio::spawn(scheduler.run());
    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served.context("Server error")?;
        }
        indexed = &mut indexer => {
            indexed
                .context("Scheduler task panicked")?
                .context("Scheduler halted")?;
        }
    }

    Ok(())
}
