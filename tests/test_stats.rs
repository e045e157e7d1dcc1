mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::init_tracing;
use common::mocks::MockStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use usdc_tracker::stats::run_statistics_loop;

#[tokio::test(start_paused = true)]
async fn aggregation_loop_refreshes_today_and_yesterday() {
    init_tracing();
    let store = Arc::new(MockStore::new());
    let token = CancellationToken::new();

    let loop_store = store.clone();
    let loop_token = token.clone();
    let handle = tokio::spawn(run_statistics_loop(
        loop_store,
        Duration::from_secs(60),
        loop_token,
    ));

    for _ in 0..2_000 {
        if store.refreshed_dates.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let dates = store.refreshed_dates.lock().unwrap().clone();
    let today = Utc::now().date_naive();
    let yesterday = today - ChronoDuration::days(1);
    assert!(dates.contains(&yesterday));
    assert!(dates.contains(&today));

    token.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn aggregation_loop_survives_store_outage() {
    init_tracing();
    let store = Arc::new(MockStore::new());
    store.set_unavailable(true);
    let token = CancellationToken::new();

    let loop_store = store.clone();
    let loop_token = token.clone();
    let handle = tokio::spawn(run_statistics_loop(
        loop_store,
        Duration::from_secs(60),
        loop_token,
    ));

    // Give the loop a few iterations against the offline store.
    tokio::time::sleep(Duration::from_secs(200)).await;

    token.cancel();
    handle.await.unwrap();
}
