mod common;

use common::mocks::{MockEvmRpc, MockStore};
use common::{addr, init_tracing, test_chain, test_ingestion_settings, transfer_log, tx_hash};
use ethers::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use usdc_tracker::api::{build_routes, AdminTokenGuard, ApiContext, CapabilityGuard};
use usdc_tracker::blockchain::EvmRpc;
use usdc_tracker::orchestrator::{IngestionOrchestrator, ListenerSupervisor};
use usdc_tracker::types::BlockTarget;

struct Harness {
    ctx: Arc<ApiContext>,
    rpc: Arc<MockEvmRpc>,
    store: Arc<MockStore>,
}

fn harness(admin_token: Option<&str>) -> Harness {
    init_tracing();
    let rpc = Arc::new(MockEvmRpc::new(1, 777));
    let store = Arc::new(MockStore::new());
    let chain = Arc::new(test_chain(1, 10));
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        chain.clone(),
        rpc.clone(),
        store.clone(),
        Arc::new(test_ingestion_settings()),
        10,
    ));

    let mut rpcs: HashMap<u64, Arc<dyn EvmRpc>> = HashMap::new();
    rpcs.insert(1, rpc.clone());
    let mut orchestrators = HashMap::new();
    orchestrators.insert(1, orchestrator);

    let ctx = Arc::new(ApiContext {
        config: Arc::new(common::test_config(vec![(*chain).clone()])),
        store: store.clone(),
        rpcs,
        orchestrators,
        supervisor: Arc::new(ListenerSupervisor::new()),
        guard: Arc::new(AdminTokenGuard::new(admin_token.map(String::from))),
    });

    Harness { ctx, rpc, store }
}

async fn seed_scenario(h: &Harness) {
    h.rpc.push_logs(vec![
        transfer_log(100, 0, Address::zero(), addr(0xaa), 5_000_000, tx_hash(1)),
        transfer_log(110, 0, addr(0xbb), Address::zero(), 2_500_000, tx_hash(2)),
        transfer_log(120, 0, addr(0xcc), addr(0xdd), 1_000_000, tx_hash(3)),
    ]);
    h.ctx.orchestrators[&1]
        .run_backfill(100, BlockTarget::Number(200))
        .await
        .unwrap();
}

#[tokio::test]
async fn chains_endpoint_lists_registry() {
    let h = harness(None);
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("GET")
        .path("/api/chains")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body[0]["id"], 1);
    assert_eq!(body[0]["name"], "testchain-1");
}

#[tokio::test]
async fn latest_block_endpoint_resolves_head() {
    let h = harness(None);
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("GET")
        .path("/api/chains/1/latest-block")
        .reply(&routes)
        .await;
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["block_number"], 777);

    let resp = warp::test::request()
        .method("GET")
        .path("/api/chains/999/latest-block")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn transactions_endpoint_filters_and_paginates() {
    let h = harness(None);
    seed_scenario(&h).await;
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("GET")
        .path("/api/transactions?chain_id=1")
        .reply(&routes)
        .await;
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["degraded"], false);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    // Newest first: the burn at block 110 precedes the mint at block 100.
    assert_eq!(body["data"][0]["type"], "CIRCLE_BURN");
    assert_eq!(body["data"][1]["type"], "CIRCLE_MINT");

    let resp = warp::test::request()
        .method("GET")
        .path("/api/transactions?type=CIRCLE_MINT")
        .reply(&routes)
        .await;
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let resp = warp::test::request()
        .method("GET")
        .path("/api/transactions?limit=1&offset=1")
        .reply(&routes)
        .await;
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["type"], "CIRCLE_MINT");
}

#[tokio::test]
async fn invalid_type_filter_is_a_bad_request() {
    let h = harness(None);
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("GET")
        .path("/api/transactions?type=BOGUS")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn summary_endpoint_reports_buckets() {
    let h = harness(None);
    seed_scenario(&h).await;
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("GET")
        .path("/api/summary")
        .reply(&routes)
        .await;
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["total_count"], 2);
    assert_eq!(body["mint_amount"], "5.000000");
    assert_eq!(body["burn_amount"], "2.500000");
    assert_eq!(body["cctp_amount"], "0");
}

#[tokio::test]
async fn store_outage_degrades_reads_instead_of_failing() {
    let h = harness(None);
    h.store.set_unavailable(true);
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("GET")
        .path("/api/transactions")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["degraded"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let resp = warp::test::request()
        .method("GET")
        .path("/api/summary")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["degraded"], true);
    assert_eq!(body["total_count"], 0);
}

#[tokio::test]
async fn backfill_endpoint_triggers_ingestion() {
    let h = harness(None);
    h.rpc.push_logs(vec![transfer_log(
        100,
        0,
        Address::zero(),
        addr(0xaa),
        5_000_000,
        tx_hash(1),
    )]);
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("POST")
        .path("/api/backfill")
        .json(&serde_json::json!({
            "chain_id": 1,
            "from_block": 100,
            "to_block": 200,
        }))
        .reply(&routes)
        .await;
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["type"], "CIRCLE_MINT");
    assert_eq!(h.store.row_count(), 1);
}

#[tokio::test]
async fn listener_start_requires_capability() {
    let h = harness(Some("sesame"));
    let routes = build_routes(h.ctx.clone());

    let resp = warp::test::request()
        .method("POST")
        .path("/api/listeners/1/start")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 403);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/listeners/1/start")
        .header("x-admin-token", "wrong")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 403);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/listeners/1/start")
        .header("x-admin-token", "sesame")
        .reply(&routes)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["success"], true);
    assert!(h.ctx.supervisor.is_running(1));

    h.ctx.supervisor.shutdown().await;
}

#[test]
fn guard_denies_everything_when_no_token_is_configured() {
    let guard = AdminTokenGuard::new(None);
    assert!(!guard.can_manage_listeners(None));
    assert!(!guard.can_manage_listeners(Some("anything")));

    let guard = AdminTokenGuard::new(Some("s3cret".to_string()));
    assert!(!guard.can_manage_listeners(None));
    assert!(!guard.can_manage_listeners(Some("wrong")));
    assert!(guard.can_manage_listeners(Some("s3cret")));
}
