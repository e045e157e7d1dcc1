//! Core domain types shared across the ingestion pipeline, store, and API.

use chrono::{DateTime, NaiveDate, Utc};
use ethers::types::{Address, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

//================================================================================================//
//                                     TRANSACTION KINDS                                          //
//================================================================================================//

/// Semantic kind of a captured USDC movement.
///
/// Only `CircleMint`, `CircleBurn`, and `Other` are ever produced from USDC
/// `Transfer` logs. The CCTP variants exist so the schema, filters, and
/// summary buckets stay shape-compatible with the wider data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    CircleMint,
    CircleBurn,
    CctpBurn,
    CctpMint,
    Other,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::CircleMint => "CIRCLE_MINT",
            TransactionType::CircleBurn => "CIRCLE_BURN",
            TransactionType::CctpBurn => "CCTP_BURN",
            TransactionType::CctpMint => "CCTP_MINT",
            TransactionType::Other => "OTHER",
        }
    }

    /// Whether rows of this kind are persisted by the ingestion pipeline.
    pub fn is_tracked(&self) -> bool {
        !matches!(self, TransactionType::Other)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CIRCLE_MINT" => Ok(TransactionType::CircleMint),
            "CIRCLE_BURN" => Ok(TransactionType::CircleBurn),
            "CCTP_BURN" => Ok(TransactionType::CctpBurn),
            "CCTP_MINT" => Ok(TransactionType::CctpMint),
            "OTHER" => Ok(TransactionType::Other),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "CONFIRMED" => Ok(TransactionStatus::Confirmed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

//================================================================================================//
//                                       FETCHED LOGS                                             //
//================================================================================================//

/// A decoded, validated USDC `Transfer` event.
///
/// Ephemeral: produced by the fetcher, consumed by the classifier, never
/// persisted in this form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLog {
    pub tx_hash: H256,
    pub block_number: u64,
    pub log_index: u64,
    pub from: Address,
    pub to: Address,
    pub raw_amount: U256,
    pub block_timestamp: u64,
}

/// Upper bound of a fetch request. `Latest` is resolved to a concrete block
/// number immediately before range queries are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTarget {
    Number(u64),
    Latest,
}

/// Result of one fetch call: decoded logs in ascending (block, log index)
/// order, plus the number of sub-ranges that were skipped on RPC failure.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub logs: Vec<TransferLog>,
    pub from_block: u64,
    pub to_block: u64,
    pub sub_queries: u32,
    pub skipped_ranges: u32,
}

//================================================================================================//
//                                      PERSISTED ROWS                                            //
//================================================================================================//

/// A classified transaction ready for insertion.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tx_hash: String,
    pub chain_id: u64,
    pub chain_name: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub source_chain: Option<String>,
    pub target_chain: Option<String>,
    pub message_hash: Option<String>,
}

/// A stored transaction row.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub tx_hash: String,
    pub chain_id: u64,
    pub chain_name: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    pub source_chain: Option<String>,
    pub target_chain: Option<String>,
    pub message_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A raw log captured into the audit `events` table, decoupled from the
/// classified `transactions` row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub tx_hash: String,
    pub log_index: u64,
    pub chain_id: u64,
    pub contract_address: String,
    pub event_name: String,
    pub topics: serde_json::Value,
    pub data: serde_json::Value,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Daily aggregate over (date, chain, type).
#[derive(Debug, Clone, Serialize)]
pub struct StatisticRow {
    pub date: NaiveDate,
    pub chain_id: u64,
    pub tx_type: TransactionType,
    pub count: i64,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
}

//================================================================================================//
//                                     FILTERS & REPORTS                                          //
//================================================================================================//

/// Filter predicates for the paginated transaction query. Results are
/// ordered newest timestamp first.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub chain_id: Option<u64>,
    pub tx_type: Option<TransactionType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Filter predicates for the aggregate summary.
#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub chain_id: Option<u64>,
    pub tx_type: Option<TransactionType>,
}

/// Filter predicates for the statistics table.
#[derive(Debug, Clone, Default)]
pub struct StatisticsFilter {
    pub date: Option<NaiveDate>,
    pub chain_id: Option<u64>,
    pub tx_type: Option<TransactionType>,
}

/// Aggregate over the filtered transaction set, bucketed by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionSummary {
    pub total_count: i64,
    pub mint_amount: Decimal,
    pub burn_amount: Decimal,
    pub cctp_amount: Decimal,
}

/// Minimal view of a newly inserted transaction, returned from backfill
/// runs for operator feedback.
#[derive(Debug, Clone, Serialize)]
pub struct InsertedTransaction {
    pub tx_hash: String,
    pub chain_id: u64,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub amount: Decimal,
}

/// Outcome of one backfill run over a bounded block range.
///
/// Re-running the same range is safe: the second run reports `inserted: 0`
/// with every row counted under `skipped_existing`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub chain_id: u64,
    pub from_block: u64,
    pub to_block: u64,
    pub attempted: u64,
    pub inserted: u64,
    pub skipped_existing: u64,
    pub skipped_ranges: u32,
    pub classification_counts: HashMap<TransactionType, u64>,
    pub inserted_transactions: Vec<InsertedTransaction>,
}
