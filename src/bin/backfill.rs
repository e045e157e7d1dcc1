//! backfill - one-shot historical ingestion over a bounded block range.
//!
//! Thin caller of the ingestion orchestrator: every manual or scripted
//! backfill goes through the same fetch → classify → dedup pipeline the
//! service itself runs, so there is exactly one implementation of it.
//!
//! Usage:
//! `cargo run --release --bin backfill -- --chain-id 1 --from-block 19000000 --to-block 19001000`
//! Omitting `--to-block` scans up to the chain head resolved at start.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use usdc_tracker::{
    blockchain::{EvmRpc, EvmRpcClient},
    config::Config,
    errors::TrackerError,
    orchestrator::IngestionOrchestrator,
    rate_limiter::initialize_global_rate_limiter_manager,
    store::{PostgresStore, TransactionStore},
    types::BlockTarget,
};

#[derive(Parser, Debug)]
#[command(about = "Backfill USDC transfer history for one chain")]
struct Args {
    /// Chain id to scan (must exist in chains.json)
    #[arg(long)]
    chain_id: u64,

    /// First block of the range
    #[arg(long, default_value_t = 0)]
    from_block: u64,

    /// Last block of the range; defaults to the current chain head
    #[arg(long)]
    to_block: Option<u64>,

    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,
}

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load_from_directory(&args.config_dir)
        .await
        .map_err(|e| TrackerError::Other(format!("Failed to load configuration: {e:#}")))?;
    config.validate_chains();

    initialize_global_rate_limiter_manager(Arc::new(
        config.chain_config.rate_limiter_settings.clone(),
    ));

    let chain = Arc::new(config.get_chain_by_id(args.chain_id)?.clone());

    let database_url = config
        .database_url()
        .ok_or_else(|| TrackerError::Other("DATABASE_URL not configured".to_string()))?;
    let store: Arc<dyn TransactionStore> = Arc::new(PostgresStore::connect(&database_url).await?);

    let ingestion = Arc::new(config.ingestion.clone());
    let rpc: Arc<dyn EvmRpc> = Arc::new(EvmRpcClient::new(
        chain.clone(),
        ingestion.timestamp_cache_size,
        Duration::from_secs(ingestion.timestamp_cache_ttl_secs),
    )?);

    let orchestrator = IngestionOrchestrator::new(
        chain.clone(),
        rpc,
        store,
        ingestion,
        config.max_blocks_per_query(&chain),
    );

    let to_block = args
        .to_block
        .map(BlockTarget::Number)
        .unwrap_or(BlockTarget::Latest);

    info!(
        chain = %chain.chain_name,
        from_block = args.from_block,
        to_block = ?args.to_block,
        "Starting backfill"
    );

    match orchestrator.run_backfill(args.from_block, to_block).await {
        Ok(report) => {
            info!(
                attempted = report.attempted,
                inserted = report.inserted,
                skipped_existing = report.skipped_existing,
                skipped_ranges = report.skipped_ranges,
                "Backfill finished"
            );
            for (kind, count) in &report.classification_counts {
                info!(kind = %kind, count, "Classification bucket");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Backfill failed");
            Err(e.into())
        }
    }
}
