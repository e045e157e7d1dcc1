//! # Ingestion Orchestrator
//!
//! Coordinates fetcher → classifier → store for one chain, in two modes:
//! a one-shot historical backfill over a bounded range, and a continuous
//! poll loop that follows the chain head. Both are idempotent against the
//! store, so overlapping or repeated runs are safe.
//!
//! Poll loops resume from the persisted per-chain watermark, which is
//! written only after a batch has been durably inserted. A crash between
//! insert and watermark write costs a re-scan, never a gap.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::H256;
use futures::Future;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::blockchain::EvmRpc;
use crate::classifier::{classify, normalize_amount};
use crate::config::{IngestionSettings, PerChainConfig};
use crate::errors::{BlockchainError, IngestError, StoreError};
use crate::fetcher::{LogFetcher, TRANSFER_TOPIC};
use crate::metrics::{BACKFILLS_COMPLETED, DUPLICATES_SKIPPED, RPC_ERRORS_COUNTER, TRANSACTIONS_INSERTED};
use crate::store::TransactionStore;
use crate::types::{
    BackfillReport, BlockTarget, InsertedTransaction, NewEvent, NewTransaction, TransactionStatus,
    TransferLog,
};

pub struct IngestionOrchestrator {
    chain: Arc<PerChainConfig>,
    rpc: Arc<dyn EvmRpc>,
    store: Arc<dyn TransactionStore>,
    fetcher: LogFetcher,
    settings: Arc<IngestionSettings>,
}

impl std::fmt::Debug for IngestionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionOrchestrator")
            .field("chain", &self.chain.chain_name)
            .finish()
    }
}

impl IngestionOrchestrator {
    pub fn new(
        chain: Arc<PerChainConfig>,
        rpc: Arc<dyn EvmRpc>,
        store: Arc<dyn TransactionStore>,
        settings: Arc<IngestionSettings>,
        max_blocks_per_query: u64,
    ) -> Self {
        let fetcher = LogFetcher::new(rpc.clone(), chain.usdc_address, max_blocks_per_query);
        Self {
            chain,
            rpc,
            store,
            fetcher,
            settings,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.chain_name
    }

    /// One-shot ingestion over `[from_block, to_block]`.
    ///
    /// OTHER-classified events are discarded; the rest are inserted through
    /// the store's dedup contract. Re-running the same range yields
    /// `inserted: 0` and the same row count.
    #[instrument(skip(self), level = "info", fields(chain = %self.chain.chain_name))]
    pub async fn run_backfill(
        &self,
        from_block: u64,
        to_block: BlockTarget,
    ) -> Result<BackfillReport, IngestError> {
        let outcome = self
            .with_retries("fetch_transfer_logs", || {
                self.fetcher.fetch_transfer_logs(from_block, to_block)
            })
            .await?;

        let mut report = BackfillReport {
            chain_id: self.chain.chain_id,
            from_block: outcome.from_block,
            to_block: outcome.to_block,
            skipped_ranges: outcome.skipped_ranges,
            ..Default::default()
        };
        self.ingest_logs(&outcome.logs, &mut report).await?;

        BACKFILLS_COMPLETED
            .with_label_values(&[&self.chain.chain_name])
            .inc();
        info!(
            chain = %self.chain.chain_name,
            from = report.from_block,
            to = report.to_block,
            attempted = report.attempted,
            inserted = report.inserted,
            skipped_existing = report.skipped_existing,
            skipped_ranges = report.skipped_ranges,
            "Backfill completed"
        );
        Ok(report)
    }

    /// Continuous ingestion following the chain head.
    ///
    /// Cancellation is cooperative and takes effect between iterations; an
    /// in-flight batch is never interrupted mid-insert (individual inserts
    /// are atomic, so abandoning a batch is safe regardless).
    #[instrument(skip(self, cancel), level = "info", fields(chain = %self.chain.chain_name))]
    pub async fn run_poll_loop(&self, cancel: CancellationToken) -> Result<(), IngestError> {
        let interval = Duration::from_secs(self.settings.poll_interval_secs.max(1));
        let mut last_processed = match self.store.get_watermark(self.chain.chain_id).await {
            Ok(Some(block)) => {
                info!(
                    chain = %self.chain.chain_name,
                    watermark = block,
                    "Resuming poll loop from persisted watermark"
                );
                Some(block)
            }
            Ok(None) => self.chain.start_block.map(|b| b.saturating_sub(1)),
            Err(e) => {
                warn!(chain = %self.chain.chain_name, error = %e, "Could not read watermark; starting from chain head");
                None
            }
        };

        info!(chain = %self.chain.chain_name, interval_secs = interval.as_secs(), "Poll loop running");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.poll_once(&mut last_processed).await {
                Ok(Some(report)) => {
                    debug!(
                        chain = %self.chain.chain_name,
                        inserted = report.inserted,
                        skipped_existing = report.skipped_existing,
                        to = report.to_block,
                        "Poll iteration ingested batch"
                    );
                }
                Ok(None) => {}
                Err(IngestError::Store(StoreError::Unavailable(e))) => {
                    // Retryable: the next iteration re-scans the same span
                    // because the watermark did not advance.
                    warn!(chain = %self.chain.chain_name, error = %e, "Store unavailable; retrying next iteration");
                }
                Err(e) => {
                    warn!(chain = %self.chain.chain_name, error = %e, "Poll iteration failed");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        info!(chain = %self.chain.chain_name, "Poll loop stopped");
        Ok(())
    }

    async fn poll_once(
        &self,
        last_processed: &mut Option<u64>,
    ) -> Result<Option<BackfillReport>, IngestError> {
        let head = self
            .with_retries("get_latest_block_number", || {
                self.rpc.get_latest_block_number()
            })
            .await?;

        let last = match *last_processed {
            Some(last) => last,
            None => {
                // First observation: establish the head as the starting
                // point without scanning history.
                self.store.set_watermark(self.chain.chain_id, head).await?;
                *last_processed = Some(head);
                info!(chain = %self.chain.chain_name, head, "Initialized watermark at chain head");
                return Ok(None);
            }
        };

        if head <= last {
            return Ok(None);
        }

        let outcome = self
            .with_retries("fetch_transfer_logs", || {
                self.fetcher
                    .fetch_transfer_logs(last + 1, BlockTarget::Number(head))
            })
            .await?;

        let mut report = BackfillReport {
            chain_id: self.chain.chain_id,
            from_block: outcome.from_block,
            to_block: outcome.to_block,
            skipped_ranges: outcome.skipped_ranges,
            ..Default::default()
        };
        self.ingest_logs(&outcome.logs, &mut report).await?;

        self.store.set_watermark(self.chain.chain_id, head).await?;
        *last_processed = Some(head);
        Ok(Some(report))
    }

    /// Classify, filter, and persist a batch of decoded logs.
    ///
    /// Store failures propagate: they must reach the job result so an
    /// operator can detect and re-run the range.
    async fn ingest_logs(
        &self,
        logs: &[TransferLog],
        report: &mut BackfillReport,
    ) -> Result<(), IngestError> {
        for log in logs {
            let kind = classify(log);
            *report.classification_counts.entry(kind).or_default() += 1;
            if !kind.is_tracked() {
                continue;
            }

            let tx_hash = format!("{:#x}", log.tx_hash);
            let amount = match normalize_amount(log.raw_amount) {
                Ok(amount) => amount,
                Err(_) => {
                    warn!(
                        chain = %self.chain.chain_name,
                        tx = %tx_hash,
                        raw = %log.raw_amount,
                        "Skipping transfer: amount exceeds representable range"
                    );
                    continue;
                }
            };

            let timestamp = DateTime::<Utc>::from_timestamp(log.block_timestamp as i64, 0)
                .unwrap_or_else(Utc::now);

            report.attempted += 1;
            let record = NewTransaction {
                tx_hash: tx_hash.clone(),
                chain_id: self.chain.chain_id,
                chain_name: self.chain.chain_name.clone(),
                block_number: log.block_number,
                timestamp,
                from_address: format!("{:#x}", log.from),
                to_address: format!("{:#x}", log.to),
                amount,
                tx_type: kind,
                status: TransactionStatus::Confirmed,
                source_chain: None,
                target_chain: None,
                message_hash: None,
            };

            if self.store.insert_if_absent(&record).await? {
                report.inserted += 1;
                report.inserted_transactions.push(InsertedTransaction {
                    tx_hash,
                    chain_id: self.chain.chain_id,
                    tx_type: kind,
                    amount,
                });
                TRANSACTIONS_INSERTED
                    .with_label_values(&[&self.chain.chain_name, kind.as_str()])
                    .inc();

                self.store.insert_event(&self.audit_event(log, timestamp)).await?;
            } else {
                report.skipped_existing += 1;
                DUPLICATES_SKIPPED
                    .with_label_values(&[&self.chain.chain_name])
                    .inc();
            }
        }
        Ok(())
    }

    /// Reconstruct the raw log view for the decoupled audit table.
    fn audit_event(&self, log: &TransferLog, timestamp: DateTime<Utc>) -> NewEvent {
        let mut amount_be = [0u8; 32];
        log.raw_amount.to_big_endian(&mut amount_be);
        NewEvent {
            tx_hash: format!("{:#x}", log.tx_hash),
            log_index: log.log_index,
            chain_id: self.chain.chain_id,
            contract_address: format!("{:#x}", self.chain.usdc_address),
            event_name: "Transfer".to_string(),
            topics: json!([
                format!("{:#x}", *TRANSFER_TOPIC),
                format!("{:#x}", H256::from(log.from)),
                format!("{:#x}", H256::from(log.to)),
            ]),
            data: json!(format!("0x{}", hex::encode(amount_be))),
            block_number: log.block_number,
            timestamp,
        }
    }

    /// Bounded immediate retries around an RPC-facing operation, so a
    /// permanently broken endpoint surfaces as a failed job instead of a
    /// silent loop. Invalid ranges are caller errors and never retried.
    async fn with_retries<T, F, Fut>(&self, what: &str, op: F) -> Result<T, IngestError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BlockchainError>>,
    {
        let max_attempts = self.settings.max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e @ BlockchainError::InvalidRange { .. }) => {
                    return Err(IngestError::FetchFailed {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    RPC_ERRORS_COUNTER
                        .with_label_values(&[&self.chain.chain_name, what])
                        .inc();
                    return Err(IngestError::FetchFailed {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(
                        chain = %self.chain.chain_name,
                        operation = what,
                        attempt,
                        error = %e,
                        "RPC operation failed, retrying"
                    );
                    sleep(Duration::from_millis(
                        self.settings.retry_backoff_ms * attempt as u64,
                    ))
                    .await;
                }
            }
        }
    }
}

//================================================================================================//
//                                    LISTENER SUPERVISION                                        //
//================================================================================================//

struct ListenerEntry {
    handle: JoinHandle<()>,
    token: CancellationToken,
}

/// Tracks at most one running poll loop per chain and owns their shutdown.
#[derive(Default)]
pub struct ListenerSupervisor {
    root_token: CancellationToken,
    listeners: DashMap<u64, ListenerEntry>,
}

impl ListenerSupervisor {
    pub fn new() -> Self {
        Self {
            root_token: CancellationToken::new(),
            listeners: DashMap::new(),
        }
    }

    pub fn is_running(&self, chain_id: u64) -> bool {
        self.listeners
            .get(&chain_id)
            .map(|entry| !entry.handle.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the poll loop for a chain. Repeat calls while the loop is
    /// alive report `ListenerAlreadyRunning`.
    pub fn start(&self, orchestrator: Arc<IngestionOrchestrator>) -> Result<(), IngestError> {
        let chain_id = orchestrator.chain_id();
        if self.is_running(chain_id) {
            return Err(IngestError::ListenerAlreadyRunning(chain_id));
        }

        let token = self.root_token.child_token();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = orchestrator.run_poll_loop(task_token).await {
                warn!(chain_id, error = %e, "Poll loop terminated with error");
            }
        });

        self.listeners.insert(chain_id, ListenerEntry { handle, token });
        Ok(())
    }

    pub fn stop(&self, chain_id: u64) -> bool {
        if let Some((_, entry)) = self.listeners.remove(&chain_id) {
            entry.token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel every listener and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        self.root_token.cancel();
        let chain_ids: Vec<u64> = self.listeners.iter().map(|e| *e.key()).collect();
        for chain_id in chain_ids {
            if let Some((_, entry)) = self.listeners.remove(&chain_id) {
                if let Err(e) = entry.handle.await {
                    warn!(chain_id, error = %e, "Poll loop task join failed");
                }
            }
        }
    }
}
