//! Application entry-point.
//!
//! 1. Load configuration → initialise tracing.
//! 2. Connect the store, build per-chain RPC clients and orchestrators.
//! 3. Start poll loops for poll-enabled chains, the statistics loop, the
//!    metrics exporter, and the API server.
//! 4. Clean, graceful shutdown driven by Ctrl-C.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use usdc_tracker::{
    api::{start_api_server, AdminTokenGuard, ApiContext},
    blockchain::{EvmRpc, EvmRpcClient},
    config::Config,
    errors::TrackerError,
    metrics::start_metrics_server,
    orchestrator::{IngestionOrchestrator, ListenerSupervisor},
    rate_limiter::initialize_global_rate_limiter_manager,
    stats::run_statistics_loop,
    store::{PostgresStore, TransactionStore},
};

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    let filter = EnvFilter::from_default_env()
        .add_directive("ethers_providers=warn".parse().unwrap())
        .add_directive("ethers=warn".parse().unwrap())
        .add_directive("tokio_postgres=warn".parse().unwrap())
        .add_directive("usdc_tracker=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let mut config = Config::load_from_directory(&config_dir)
        .await
        .map_err(|e| TrackerError::Other(format!("Failed to load configuration: {e:#}")))?;

    let dropped = config.validate_chains();
    if !dropped.is_empty() {
        warn!(count = dropped.len(), "Some chains were dropped during validation");
    }
    if config.list_chains().is_empty() {
        error!("No valid chains configured; nothing to do");
        return Err(TrackerError::Other("empty chain registry".to_string()));
    }
    info!(chains = config.list_chains().len(), "Configuration loaded");

    initialize_global_rate_limiter_manager(Arc::new(
        config.chain_config.rate_limiter_settings.clone(),
    ));

    let database_url = config
        .database_url()
        .ok_or_else(|| TrackerError::Other("DATABASE_URL not configured".to_string()))?;
    let store: Arc<dyn TransactionStore> = Arc::new(PostgresStore::connect(&database_url).await?);

    let config = Arc::new(config);
    let ingestion = Arc::new(config.ingestion.clone());
    let timestamp_cache_ttl = Duration::from_secs(ingestion.timestamp_cache_ttl_secs);

    let mut rpcs: HashMap<u64, Arc<dyn EvmRpc>> = HashMap::new();
    let mut orchestrators: HashMap<u64, Arc<IngestionOrchestrator>> = HashMap::new();
    for chain in config.list_chains() {
        let chain = Arc::new(chain.clone());
        let rpc: Arc<dyn EvmRpc> = match EvmRpcClient::new(
            chain.clone(),
            ingestion.timestamp_cache_size,
            timestamp_cache_ttl,
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                // A broken endpoint is fatal for this chain only.
                warn!(chain = %chain.chain_name, error = %e, "Skipping chain: RPC client setup failed");
                continue;
            }
        };
        let orchestrator = Arc::new(IngestionOrchestrator::new(
            chain.clone(),
            rpc.clone(),
            store.clone(),
            ingestion.clone(),
            config.max_blocks_per_query(&chain),
        ));
        rpcs.insert(chain.chain_id, rpc);
        orchestrators.insert(chain.chain_id, orchestrator);
    }

    let supervisor = Arc::new(ListenerSupervisor::new());
    for chain in config.list_chains() {
        if chain.poll_enabled {
            if let Some(orchestrator) = orchestrators.get(&chain.chain_id) {
                match supervisor.start(orchestrator.clone()) {
                    Ok(()) => info!(chain = %chain.chain_name, "Poll loop started"),
                    Err(e) => warn!(chain = %chain.chain_name, error = %e, "Failed to start poll loop"),
                }
            }
        }
    }

    let shutdown = CancellationToken::new();

    let stats_handle = tokio::spawn(run_statistics_loop(
        store.clone(),
        Duration::from_secs(ingestion.stats_interval_secs.max(1)),
        shutdown.child_token(),
    ));

    let metrics_handle =
        start_metrics_server(config.api.host.clone(), config.api.metrics_port);

    let ctx = Arc::new(ApiContext {
        config: config.clone(),
        store,
        rpcs,
        orchestrators,
        supervisor: supervisor.clone(),
        guard: Arc::new(AdminTokenGuard::new(config.api.admin_token.clone())),
    });
    let api_handle = start_api_server(
        ctx,
        config.api.host.clone(),
        config.api.port,
        shutdown.child_token(),
    );

    info!("usdc-tracker running; press Ctrl-C to stop");
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    shutdown.cancel();
    supervisor.shutdown().await;
    if let Err(e) = stats_handle.await {
        warn!(error = %e, "Statistics loop join failed");
    }
    if let Err(e) = api_handle.await {
        warn!(error = %e, "API server join failed");
    }
    metrics_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
