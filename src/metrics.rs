//! # Global Metrics Registry
//!
//! All Prometheus metrics for the tracker are defined and registered here,
//! giving a single point of reference for the observability surface. The
//! exporter runs as its own warp task on the configured metrics port.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};
use warp::{Filter, Reply};

// --- RPC layer ---
pub static RPC_LATENCY_HISTOGRAM: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tracker_rpc_latency_seconds",
        "Latency of JSON-RPC calls.",
        &["method"]
    )
    .expect("Failed to register tracker_rpc_latency_seconds")
});

pub static RPC_RETRIES_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_rpc_retries_total",
        "Number of retried JSON-RPC calls.",
        &["method"]
    )
    .expect("Failed to register tracker_rpc_retries_total")
});

pub static RPC_ERRORS_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_rpc_errors_total",
        "Number of failed JSON-RPC calls after retries.",
        &["chain", "method"]
    )
    .expect("Failed to register tracker_rpc_errors_total")
});

// --- Ingestion pipeline ---
pub static LOGS_FETCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_logs_fetched_total",
        "Decoded Transfer logs returned by the fetcher.",
        &["chain"]
    )
    .expect("Failed to register tracker_logs_fetched_total")
});

pub static SUBRANGES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_subranges_skipped_total",
        "getLogs sub-ranges skipped after an RPC failure.",
        &["chain"]
    )
    .expect("Failed to register tracker_subranges_skipped_total")
});

pub static TRANSACTIONS_INSERTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_transactions_inserted_total",
        "Classified transactions newly persisted.",
        &["chain", "type"]
    )
    .expect("Failed to register tracker_transactions_inserted_total")
});

pub static DUPLICATES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_duplicates_skipped_total",
        "Inserts skipped because the transaction already existed.",
        &["chain"]
    )
    .expect("Failed to register tracker_duplicates_skipped_total")
});

pub static STORE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_store_errors_total",
        "Persistence-layer failures by operation.",
        &["operation"]
    )
    .expect("Failed to register tracker_store_errors_total")
});

pub static BACKFILLS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tracker_backfills_completed_total",
        "Completed backfill runs.",
        &["chain"]
    )
    .expect("Failed to register tracker_backfills_completed_total")
});

/// Starts the Prometheus metrics server on a separate Tokio task.
pub fn start_metrics_server(host: String, port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .expect("Invalid metrics server address");

        info!(target: "metrics", "Prometheus metrics server starting on http://{}", addr);

        let metrics_route = warp::path("metrics").and_then(metrics_handler);
        warp::serve(metrics_route).run(addr).await;
    })
}

/// Warp handler function to collect and encode metrics for Prometheus.
async fn metrics_handler() -> Result<warp::reply::Response, warp::Rejection> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(target: "metrics", "Failed to encode metrics: {}", e);
        let response = warp::reply::with_status(
            "Failed to encode metrics".to_string(),
            warp::http::StatusCode::INTERNAL_SERVER_ERROR,
        );
        return Ok(response.into_response());
    }

    let response = warp::reply::with_header(
        String::from_utf8_lossy(&buffer).to_string(),
        "Content-Type",
        encoder.format_type(),
    );
    Ok(response.into_response())
}
