//! # Transfer Log Fetcher
//!
//! Retrieves USDC `Transfer` logs for a block range, honoring
//! provider-imposed per-call range caps by partitioning the request into
//! contiguous sub-ranges. Raw logs are validated and decoded at this
//! boundary; nothing downstream ever sees a log with defaulted fields.
//!
//! Error policy: a failed sub-range is logged, counted, and skipped, so a
//! transient provider error costs a gap instead of the whole fetch.
//! Callers needing strong completeness re-run the same range.

use crate::blockchain::EvmRpc;
use crate::errors::BlockchainError;
use crate::metrics::{LOGS_FETCHED, SUBRANGES_SKIPPED};
use crate::types::{BlockTarget, FetchOutcome, TransferLog};
use ethers::types::{Address, Filter, Log, H256, U256};
use ethers::utils::keccak256;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

lazy_static! {
    /// `keccak256("Transfer(address,address,uint256)")`
    pub static ref TRANSFER_TOPIC: H256 =
        H256::from(keccak256("Transfer(address,address,uint256)"));
}

#[derive(Debug, Clone)]
pub struct LogFetcher {
    rpc: Arc<dyn EvmRpc>,
    usdc_address: Address,
    max_blocks_per_query: u64,
}

impl LogFetcher {
    pub fn new(rpc: Arc<dyn EvmRpc>, usdc_address: Address, max_blocks_per_query: u64) -> Self {
        Self {
            rpc,
            usdc_address,
            max_blocks_per_query: max_blocks_per_query.max(1),
        }
    }

    /// Fetch and decode Transfer logs for `[from_block, to_block]`.
    ///
    /// `BlockTarget::Latest` is resolved to a concrete head block
    /// immediately before the range queries are issued. Results are in
    /// ascending (block number, log index) order.
    #[instrument(skip(self), level = "debug", fields(chain = %self.rpc.chain_name()))]
    pub async fn fetch_transfer_logs(
        &self,
        from_block: u64,
        to_block: BlockTarget,
    ) -> Result<FetchOutcome, BlockchainError> {
        let to_block = match to_block {
            BlockTarget::Number(n) => n,
            BlockTarget::Latest => self.rpc.get_latest_block_number().await?,
        };
        if from_block > to_block {
            return Err(BlockchainError::InvalidRange {
                from: from_block,
                to: to_block,
            });
        }

        let chain = self.rpc.chain_name().to_string();
        let mut outcome = FetchOutcome {
            from_block,
            to_block,
            ..Default::default()
        };
        // Block timestamps repeat across logs of the same block; resolve
        // each block at most once per fetch call.
        let mut timestamps: HashMap<u64, u64> = HashMap::new();

        let mut start = from_block;
        while start <= to_block {
            let end = start
                .saturating_add(self.max_blocks_per_query - 1)
                .min(to_block);

            let filter = Filter::new()
                .address(self.usdc_address)
                .topic0(*TRANSFER_TOPIC)
                .from_block(start)
                .to_block(end);

            outcome.sub_queries += 1;
            match self.rpc.get_logs(&filter).await {
                Ok(logs) => {
                    for log in logs {
                        match self.decode_log(&log) {
                            Ok(decoded) => {
                                if let Some(enriched) =
                                    self.enrich_timestamp(decoded, &mut timestamps).await
                                {
                                    outcome.logs.push(enriched);
                                }
                            }
                            Err(e) => {
                                warn!(chain = %chain, error = %e, "Rejecting malformed Transfer log");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        chain = %chain,
                        from = start,
                        to = end,
                        error = %e,
                        "Sub-range query failed, skipping"
                    );
                    SUBRANGES_SKIPPED.with_label_values(&[&chain]).inc();
                    outcome.skipped_ranges += 1;
                }
            }

            start = match end.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }

        outcome
            .logs
            .sort_by_key(|l| (l.block_number, l.log_index));

        LOGS_FETCHED
            .with_label_values(&[&chain])
            .inc_by(outcome.logs.len() as u64);
        debug!(
            chain = %chain,
            from = from_block,
            to = to_block,
            logs = outcome.logs.len(),
            sub_queries = outcome.sub_queries,
            skipped_ranges = outcome.skipped_ranges,
            "Fetched Transfer logs"
        );
        Ok(outcome)
    }

    /// Validate a raw log's shape and decode it into a `TransferLog`
    /// (without timestamp).
    fn decode_log(&self, log: &Log) -> Result<TransferLog, BlockchainError> {
        let tx_hash = log.transaction_hash.ok_or_else(|| BlockchainError::MalformedLog {
            tx: "<unknown>".to_string(),
            reason: "missing transaction hash".to_string(),
        })?;
        let malformed = |reason: &str| BlockchainError::MalformedLog {
            tx: format!("{:#x}", tx_hash),
            reason: reason.to_string(),
        };

        let block_number = log
            .block_number
            .ok_or_else(|| malformed("missing block number"))?
            .as_u64();
        let log_index = log
            .log_index
            .ok_or_else(|| malformed("missing log index"))?
            .as_u64();

        // ERC-20 Transfer carries exactly topic0 + indexed from + indexed to.
        if log.topics.len() != 3 {
            return Err(malformed(&format!(
                "expected 3 topics, got {}",
                log.topics.len()
            )));
        }
        if log.topics[0] != *TRANSFER_TOPIC {
            return Err(malformed("topic0 is not the Transfer signature"));
        }

        // Topics are 32-byte values with the address in the lower 20 bytes.
        let from = Address::from_slice(&log.topics[1].as_bytes()[12..]);
        let to = Address::from_slice(&log.topics[2].as_bytes()[12..]);
        if log.data.len() != 32 {
            return Err(malformed(&format!(
                "expected 32-byte amount payload, got {}",
                log.data.len()
            )));
        }
        let raw_amount = U256::from_big_endian(&log.data);

        Ok(TransferLog {
            tx_hash,
            block_number,
            log_index,
            from,
            to,
            raw_amount,
            block_timestamp: 0,
        })
    }

    /// Resolve the containing block's timestamp through the per-call cache.
    /// A log whose block cannot be resolved is dropped with a warning.
    async fn enrich_timestamp(
        &self,
        mut log: TransferLog,
        timestamps: &mut HashMap<u64, u64>,
    ) -> Option<TransferLog> {
        if let Some(&ts) = timestamps.get(&log.block_number) {
            log.block_timestamp = ts;
            return Some(log);
        }
        match self.rpc.get_block_timestamp(log.block_number).await {
            Ok(ts) => {
                timestamps.insert(log.block_number, ts);
                log.block_timestamp = ts;
                Some(log)
            }
            Err(e) => {
                warn!(
                    chain = %self.rpc.chain_name(),
                    block = log.block_number,
                    tx = %format!("{:#x}", log.tx_hash),
                    error = %e,
                    "Dropping log: block timestamp unavailable"
                );
                None
            }
        }
    }
}
