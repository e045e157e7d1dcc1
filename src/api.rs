//! # HTTP API
//!
//! warp-based read and control surface:
//!
//! - Read: transactions (filtered/paginated), per-hash lookup, summary,
//!   statistics, supported chains, latest block number.
//! - Control: synchronous historical backfill, listener start (behind a
//!   capability check hook).
//!
//! The read endpoints never surface raw infrastructure errors: when the
//! store is unreachable they return empty results with a `degraded` flag.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warp::{Filter, Reply};

use crate::blockchain::EvmRpc;
use crate::config::Config;
use crate::errors::{IngestError, StoreError};
use crate::metrics::STORE_ERRORS;
use crate::orchestrator::{IngestionOrchestrator, ListenerSupervisor};
use crate::store::TransactionStore;
use crate::types::{
    BackfillReport, BlockTarget, StatisticsFilter, SummaryFilter, TransactionFilter,
    TransactionType,
};

//================================================================================================//
//                                      CAPABILITY HOOK                                           //
//================================================================================================//

/// Authorization hook for the operator control surface. Authorization
/// policy itself lives outside the core; this trait is the seam where a
/// deployment plugs its own check in.
pub trait CapabilityGuard: Send + Sync {
    fn can_manage_listeners(&self, presented: Option<&str>) -> bool;
}

/// Shared-secret guard: callers present the configured token in the
/// `x-admin-token` header. With no token configured, all control calls are
/// denied.
pub struct AdminTokenGuard {
    token: Option<String>,
}

impl AdminTokenGuard {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl CapabilityGuard for AdminTokenGuard {
    fn can_manage_listeners(&self, presented: Option<&str>) -> bool {
        match (&self.token, presented) {
            (Some(expected), Some(presented)) => expected == presented,
            _ => false,
        }
    }
}

//================================================================================================//
//                                          CONTEXT                                               //
//================================================================================================//

pub struct ApiContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn TransactionStore>,
    pub rpcs: HashMap<u64, Arc<dyn EvmRpc>>,
    pub orchestrators: HashMap<u64, Arc<IngestionOrchestrator>>,
    pub supervisor: Arc<ListenerSupervisor>,
    pub guard: Arc<dyn CapabilityGuard>,
}

fn with_ctx(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (Arc<ApiContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

//================================================================================================//
//                                     REQUEST / RESPONSE                                         //
//================================================================================================//

#[derive(Debug, Deserialize)]
struct TransactionsQuery {
    chain_id: Option<u64>,
    #[serde(rename = "type")]
    tx_type: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    chain_id: Option<u64>,
    #[serde(rename = "type")]
    tx_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatisticsQuery {
    date: Option<NaiveDate>,
    chain_id: Option<u64>,
    #[serde(rename = "type")]
    tx_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BackfillRequest {
    chain_id: u64,
    #[serde(default)]
    from_block: u64,
    to_block: Option<u64>,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Serialize)]
struct ChainInfo {
    id: u64,
    name: String,
}

fn error_reply(status: warp::http::StatusCode, message: &str) -> warp::reply::Response {
    warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            success: false,
            error: message.to_string(),
        }),
        status,
    )
    .into_response()
}

fn parse_type(raw: &Option<String>) -> Result<Option<TransactionType>, String> {
    match raw {
        None => Ok(None),
        Some(s) => TransactionType::from_str(s).map(Some),
    }
}

//================================================================================================//
//                                         HANDLERS                                               //
//================================================================================================//

async fn list_chains(ctx: Arc<ApiContext>) -> Result<warp::reply::Response, Infallible> {
    let chains: Vec<ChainInfo> = ctx
        .config
        .list_chains()
        .into_iter()
        .map(|c| ChainInfo {
            id: c.chain_id,
            name: c.chain_name.clone(),
        })
        .collect();
    Ok(warp::reply::json(&chains).into_response())
}

async fn latest_block(
    chain_id: u64,
    ctx: Arc<ApiContext>,
) -> Result<warp::reply::Response, Infallible> {
    let Some(rpc) = ctx.rpcs.get(&chain_id) else {
        return Ok(error_reply(
            warp::http::StatusCode::NOT_FOUND,
            &format!("Unsupported chain: {}", chain_id),
        ));
    };
    match rpc.get_latest_block_number().await {
        Ok(block_number) => Ok(warp::reply::json(&serde_json::json!({
            "success": true,
            "block_number": block_number,
        }))
        .into_response()),
        Err(e) => {
            warn!(chain_id, error = %e, "Latest block lookup failed");
            Ok(warp::reply::json(&serde_json::json!({
                "success": false,
                "error": "chain RPC unavailable",
            }))
            .into_response())
        }
    }
}

async fn get_transactions(
    query: TransactionsQuery,
    ctx: Arc<ApiContext>,
) -> Result<warp::reply::Response, Infallible> {
    let tx_type = match parse_type(&query.tx_type) {
        Ok(t) => t,
        Err(e) => return Ok(error_reply(warp::http::StatusCode::BAD_REQUEST, &e)),
    };

    let api = &ctx.config.api;
    let limit = query
        .limit
        .unwrap_or(api.default_page_size)
        .clamp(1, api.max_page_size);
    let filter = TransactionFilter {
        chain_id: query.chain_id,
        tx_type,
        start_time: query.start_time,
        end_time: query.end_time,
        limit,
        offset: query.offset.unwrap_or(0).max(0),
    };

    match ctx.store.query(&filter).await {
        Ok(data) => Ok(warp::reply::json(&serde_json::json!({
            "success": true,
            "degraded": false,
            "data": data,
        }))
        .into_response()),
        Err(e) => Ok(degraded_list_reply("query", e)),
    }
}

async fn get_transaction_by_hash(
    tx_hash: String,
    ctx: Arc<ApiContext>,
) -> Result<warp::reply::Response, Infallible> {
    match ctx.store.find_by_hash(&tx_hash).await {
        Ok(Some(record)) => Ok(warp::reply::json(&serde_json::json!({
            "success": true,
            "degraded": false,
            "data": record,
        }))
        .into_response()),
        Ok(None) => Ok(error_reply(
            warp::http::StatusCode::NOT_FOUND,
            "transaction not found",
        )),
        Err(e) => {
            record_store_failure("find_by_hash", &e);
            Ok(warp::reply::json(&serde_json::json!({
                "success": true,
                "degraded": true,
                "data": null,
            }))
            .into_response())
        }
    }
}

async fn get_summary(
    query: SummaryQuery,
    ctx: Arc<ApiContext>,
) -> Result<warp::reply::Response, Infallible> {
    let tx_type = match parse_type(&query.tx_type) {
        Ok(t) => t,
        Err(e) => return Ok(error_reply(warp::http::StatusCode::BAD_REQUEST, &e)),
    };
    let filter = SummaryFilter {
        chain_id: query.chain_id,
        tx_type,
    };

    match ctx.store.summary(&filter).await {
        Ok(summary) => Ok(warp::reply::json(&serde_json::json!({
            "success": true,
            "degraded": false,
            "total_count": summary.total_count,
            "mint_amount": summary.mint_amount,
            "burn_amount": summary.burn_amount,
            "cctp_amount": summary.cctp_amount,
        }))
        .into_response()),
        Err(e) => {
            record_store_failure("summary", &e);
            Ok(warp::reply::json(&serde_json::json!({
                "success": true,
                "degraded": true,
                "total_count": 0,
                "mint_amount": "0",
                "burn_amount": "0",
                "cctp_amount": "0",
            }))
            .into_response())
        }
    }
}

async fn get_statistics(
    query: StatisticsQuery,
    ctx: Arc<ApiContext>,
) -> Result<warp::reply::Response, Infallible> {
    let tx_type = match parse_type(&query.tx_type) {
        Ok(t) => t,
        Err(e) => return Ok(error_reply(warp::http::StatusCode::BAD_REQUEST, &e)),
    };
    let filter = StatisticsFilter {
        date: query.date,
        chain_id: query.chain_id,
        tx_type,
    };

    match ctx.store.query_statistics(&filter).await {
        Ok(data) => Ok(warp::reply::json(&serde_json::json!({
            "success": true,
            "degraded": false,
            "data": data,
        }))
        .into_response()),
        Err(e) => Ok(degraded_list_reply("query_statistics", e)),
    }
}

async fn run_backfill(
    req: BackfillRequest,
    ctx: Arc<ApiContext>,
) -> Result<warp::reply::Response, Infallible> {
    let Some(orchestrator) = ctx.orchestrators.get(&req.chain_id) else {
        return Ok(error_reply(
            warp::http::StatusCode::NOT_FOUND,
            &format!("Unsupported chain: {}", req.chain_id),
        ));
    };

    let to_block = req
        .to_block
        .map(BlockTarget::Number)
        .unwrap_or(BlockTarget::Latest);

    match orchestrator.run_backfill(req.from_block, to_block).await {
        Ok(report) => Ok(warp::reply::json(&backfill_body(&report)).into_response()),
        Err(e) => {
            warn!(chain_id = req.chain_id, error = %e, "Backfill request failed");
            Ok(warp::reply::json(&ErrorBody {
                success: false,
                error: e.to_string(),
            })
            .into_response())
        }
    }
}

fn backfill_body(report: &BackfillReport) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "count": report.inserted,
        "data": report.inserted_transactions,
        "report": report,
    })
}

async fn start_listener(
    chain_id: u64,
    admin_token: Option<String>,
    ctx: Arc<ApiContext>,
) -> Result<warp::reply::Response, Infallible> {
    if !ctx.guard.can_manage_listeners(admin_token.as_deref()) {
        return Ok(error_reply(
            warp::http::StatusCode::FORBIDDEN,
            "Only administrators can start listeners",
        ));
    }

    let Some(orchestrator) = ctx.orchestrators.get(&chain_id) else {
        return Ok(error_reply(
            warp::http::StatusCode::NOT_FOUND,
            &format!("Unsupported chain: {}", chain_id),
        ));
    };

    match ctx.supervisor.start(orchestrator.clone()) {
        Ok(()) => {
            info!(chain_id, "Listener started via API");
            Ok(warp::reply::json(&serde_json::json!({
                "success": true,
                "message": format!("Listener started for chain {}", chain_id),
            }))
            .into_response())
        }
        Err(IngestError::ListenerAlreadyRunning(_)) => Ok(warp::reply::json(&serde_json::json!({
            "success": true,
            "message": format!("Listener for chain {} is already running", chain_id),
        }))
        .into_response()),
        Err(e) => Ok(warp::reply::json(&ErrorBody {
            success: false,
            error: e.to_string(),
        })
        .into_response()),
    }
}

fn record_store_failure(operation: &str, e: &StoreError) {
    STORE_ERRORS.with_label_values(&[operation]).inc();
    warn!(operation, error = %e, "Store operation failed; degrading response");
}

fn degraded_list_reply(operation: &str, e: StoreError) -> warp::reply::Response {
    record_store_failure(operation, &e);
    warp::reply::json(&serde_json::json!({
        "success": true,
        "degraded": true,
        "data": [],
    }))
    .into_response()
}

//================================================================================================//
//                                          ROUTES                                                //
//================================================================================================//

pub fn build_routes(
    ctx: Arc<ApiContext>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let health = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({ "status": "ok" }))
    });

    let chains = warp::path!("api" / "chains")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(list_chains);

    let latest = warp::path!("api" / "chains" / u64 / "latest-block")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(latest_block);

    let transactions = warp::path!("api" / "transactions")
        .and(warp::get())
        .and(warp::query::<TransactionsQuery>())
        .and(with_ctx(ctx.clone()))
        .and_then(get_transactions);

    let transaction_by_hash = warp::path!("api" / "transactions" / String)
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_transaction_by_hash);

    let summary = warp::path!("api" / "summary")
        .and(warp::get())
        .and(warp::query::<SummaryQuery>())
        .and(with_ctx(ctx.clone()))
        .and_then(get_summary);

    let statistics = warp::path!("api" / "statistics")
        .and(warp::get())
        .and(warp::query::<StatisticsQuery>())
        .and(with_ctx(ctx.clone()))
        .and_then(get_statistics);

    let backfill = warp::path!("api" / "backfill")
        .and(warp::post())
        .and(warp::body::json::<BackfillRequest>())
        .and(with_ctx(ctx.clone()))
        .and_then(run_backfill);

    let listener_start = warp::path!("api" / "listeners" / u64 / "start")
        .and(warp::post())
        .and(warp::header::optional::<String>("x-admin-token"))
        .and(with_ctx(ctx))
        .and_then(start_listener);

    health
        .or(chains)
        .or(latest)
        .or(transaction_by_hash)
        .or(transactions)
        .or(summary)
        .or(statistics)
        .or(backfill)
        .or(listener_start)
}

/// Start the API server on its own task, shutting down when the token
/// fires.
pub fn start_api_server(
    ctx: Arc<ApiContext>,
    host: String,
    port: u16,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr: SocketAddr = match format!("{}:{}", host, port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(host = %host, port, error = %e, "Invalid API server address");
                return;
            }
        };
        info!("API server starting on http://{}", addr);
        let routes = build_routes(ctx);
        let (_, server) = warp::serve(routes)
            .bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await });
        server.await;
        info!("API server stopped");
    })
}
