//! Periodic daily statistics aggregation.
//!
//! Recomputes the (date, chain, type) count/total/avg snapshots from the
//! transactions table. Each pass covers today and yesterday (UTC), so rows
//! that land just after a day boundary still settle into the closed day's
//! snapshot.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::TransactionStore;

pub async fn run_statistics_loop(
    store: Arc<dyn TransactionStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Statistics aggregation loop running");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let today = Utc::now().date_naive();
        let yesterday = today - ChronoDuration::days(1);
        for date in [yesterday, today] {
            match store.refresh_statistics(date).await {
                Ok(rows) => {
                    debug!(%date, rows, "Refreshed daily statistics");
                }
                Err(e) => {
                    warn!(%date, error = %e, "Statistics refresh failed");
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    info!("Statistics aggregation loop stopped");
}
