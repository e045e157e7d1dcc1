//! Mock implementations of the RPC and store traits for integration tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use ethers::types::{Filter, FilterBlockOption, Log};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use usdc_tracker::blockchain::EvmRpc;
use usdc_tracker::errors::{BlockchainError, StoreError};
use usdc_tracker::store::TransactionStore;
use usdc_tracker::types::{
    NewEvent, NewTransaction, StatisticRow, StatisticsFilter, SummaryFilter, TransactionFilter,
    TransactionRecord, TransactionSummary, TransactionType,
};

// === Mock RPC ===

/// In-memory chain: a head block, a set of logs, per-block timestamps, and
/// optional failure injection per sub-range.
#[derive(Debug)]
pub struct MockEvmRpc {
    pub chain_id: u64,
    pub chain_name: String,
    pub latest_block: AtomicU64,
    pub logs: Mutex<Vec<Log>>,
    /// Sub-ranges whose getLogs call fails with a provider error.
    pub fail_ranges: Mutex<HashSet<(u64, u64)>>,
    /// Every (from, to) range requested, in order.
    pub range_calls: Mutex<Vec<(u64, u64)>>,
    pub timestamp_calls: AtomicU64,
    pub fail_latest_block: AtomicBool,
}

impl MockEvmRpc {
    pub fn new(chain_id: u64, latest_block: u64) -> Self {
        Self {
            chain_id,
            chain_name: format!("testchain-{}", chain_id),
            latest_block: AtomicU64::new(latest_block),
            logs: Mutex::new(Vec::new()),
            fail_ranges: Mutex::new(HashSet::new()),
            range_calls: Mutex::new(Vec::new()),
            timestamp_calls: AtomicU64::new(0),
            fail_latest_block: AtomicBool::new(false),
        }
    }

    pub fn push_logs(&self, mut logs: Vec<Log>) {
        self.logs.lock().unwrap().append(&mut logs);
    }

    pub fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::SeqCst);
    }

    pub fn fail_range(&self, from: u64, to: u64) {
        self.fail_ranges.lock().unwrap().insert((from, to));
    }

    pub fn recorded_ranges(&self) -> Vec<(u64, u64)> {
        self.range_calls.lock().unwrap().clone()
    }

    fn filter_range(filter: &Filter) -> (u64, u64) {
        match filter.block_option {
            FilterBlockOption::Range {
                from_block,
                to_block,
            } => (
                from_block
                    .and_then(|b| b.as_number())
                    .map(|n| n.as_u64())
                    .unwrap_or(0),
                to_block
                    .and_then(|b| b.as_number())
                    .map(|n| n.as_u64())
                    .unwrap_or(u64::MAX),
            ),
            _ => (0, u64::MAX),
        }
    }
}

#[async_trait]
impl EvmRpc for MockEvmRpc {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn get_latest_block_number(&self) -> Result<u64, BlockchainError> {
        if self.fail_latest_block.load(Ordering::SeqCst) {
            return Err(BlockchainError::Provider("connection refused".to_string()));
        }
        Ok(self.latest_block.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, BlockchainError> {
        let (from, to) = Self::filter_range(filter);
        self.range_calls.lock().unwrap().push((from, to));

        if self.fail_ranges.lock().unwrap().contains(&(from, to)) {
            return Err(BlockchainError::Provider(format!(
                "injected failure for range {}-{}",
                from, to
            )));
        }

        let logs = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
                block >= from && block <= to
            })
            .cloned()
            .collect();
        Ok(logs)
    }

    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, BlockchainError> {
        self.timestamp_calls.fetch_add(1, Ordering::SeqCst);
        // Deterministic synthetic timestamps, one second per block.
        Ok(1_700_000_000 + block_number)
    }
}

// === Mock Store ===

/// In-memory store mirroring the Postgres dedup and query semantics.
#[derive(Debug, Default)]
pub struct MockStore {
    pub transactions: Mutex<HashMap<(u64, String), TransactionRecord>>,
    pub events: Mutex<HashSet<(u64, String, u64)>>,
    pub watermarks: Mutex<HashMap<u64, u64>>,
    pub refreshed_dates: Mutex<Vec<NaiveDate>>,
    pub unavailable: AtomicBool,
    next_id: AtomicI64,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.transactions.lock().unwrap().len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionStore for MockStore {
    async fn insert_if_absent(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut transactions = self.transactions.lock().unwrap();
        let key = (tx.chain_id, tx.tx_hash.clone());
        if transactions.contains_key(&key) {
            return Ok(false);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = chrono::Utc::now();
        transactions.insert(
            key,
            TransactionRecord {
                id,
                tx_hash: tx.tx_hash.clone(),
                chain_id: tx.chain_id,
                chain_name: tx.chain_name.clone(),
                block_number: tx.block_number,
                timestamp: tx.timestamp,
                from_address: tx.from_address.clone(),
                to_address: tx.to_address.clone(),
                amount: tx.amount,
                tx_type: tx.tx_type,
                status: tx.status,
                source_chain: tx.source_chain.clone(),
                target_chain: tx.target_chain.clone(),
                message_hash: tx.message_hash.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(true)
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<bool, StoreError> {
        self.check_available()?;
        let key = (event.chain_id, event.tx_hash.clone(), event.log_index);
        Ok(self.events.lock().unwrap().insert(key))
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, StoreError> {
        self.check_available()?;
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .values()
            .find(|r| r.tx_hash == tx_hash)
            .cloned())
    }

    async fn query(&self, filter: &TransactionFilter) -> Result<Vec<TransactionRecord>, StoreError> {
        self.check_available()?;
        let mut rows: Vec<TransactionRecord> = self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|r| filter.chain_id.map_or(true, |c| r.chain_id == c))
            .filter(|r| filter.tx_type.map_or(true, |t| r.tx_type == t))
            .filter(|r| filter.start_time.map_or(true, |t| r.timestamp >= t))
            .filter(|r| filter.end_time.map_or(true, |t| r.timestamp <= t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let limit = if filter.limit > 0 { filter.limit } else { 100 } as usize;
        let offset = filter.offset.max(0) as usize;
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn summary(&self, filter: &SummaryFilter) -> Result<TransactionSummary, StoreError> {
        self.check_available()?;
        let mut summary = TransactionSummary::default();
        for record in self.transactions.lock().unwrap().values() {
            if filter.chain_id.map_or(false, |c| record.chain_id != c) {
                continue;
            }
            if filter.tx_type.map_or(false, |t| record.tx_type != t) {
                continue;
            }
            summary.total_count += 1;
            match record.tx_type {
                TransactionType::CircleMint => summary.mint_amount += record.amount,
                TransactionType::CircleBurn => summary.burn_amount += record.amount,
                TransactionType::CctpMint | TransactionType::CctpBurn => {
                    summary.cctp_amount += record.amount
                }
                TransactionType::Other => {}
            }
        }
        Ok(summary)
    }

    async fn get_watermark(&self, chain_id: u64) -> Result<Option<u64>, StoreError> {
        self.check_available()?;
        Ok(self.watermarks.lock().unwrap().get(&chain_id).copied())
    }

    async fn set_watermark(&self, chain_id: u64, block_number: u64) -> Result<(), StoreError> {
        self.check_available()?;
        self.watermarks.lock().unwrap().insert(chain_id, block_number);
        Ok(())
    }

    async fn refresh_statistics(&self, date: NaiveDate) -> Result<u64, StoreError> {
        self.check_available()?;
        self.refreshed_dates.lock().unwrap().push(date);
        Ok(0)
    }

    async fn query_statistics(
        &self,
        filter: &StatisticsFilter,
    ) -> Result<Vec<StatisticRow>, StoreError> {
        self.check_available()?;
        // Statistics are recomputed from transactions on demand here; the
        // Postgres implementation materializes them instead.
        let mut buckets: HashMap<(NaiveDate, u64, TransactionType), (i64, Decimal)> =
            HashMap::new();
        for record in self.transactions.lock().unwrap().values() {
            let date = record.timestamp.date_naive();
            if filter.date.map_or(false, |d| date != d) {
                continue;
            }
            if filter.chain_id.map_or(false, |c| record.chain_id != c) {
                continue;
            }
            if filter.tx_type.map_or(false, |t| record.tx_type != t) {
                continue;
            }
            let entry = buckets
                .entry((date, record.chain_id, record.tx_type))
                .or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += record.amount;
        }
        Ok(buckets
            .into_iter()
            .map(|((date, chain_id, tx_type), (count, total))| StatisticRow {
                date,
                chain_id,
                tx_type,
                count,
                total_amount: total,
                avg_amount: total / Decimal::from(count.max(1)),
            })
            .collect())
    }
}
