//! # Transaction Store
//!
//! PostgreSQL persistence behind the `TransactionStore` trait. The store is
//! the pipeline's only synchronization point: `insert_if_absent` relies on
//! a unique index plus `ON CONFLICT DO NOTHING`, so concurrent ingestion
//! tasks observing the same transaction produce exactly one row with no
//! in-process locking. A duplicate is a normal `false` outcome, never an
//! error.

use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::{Config as PgConfig, Pool, PoolConfig, Runtime};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::types::{
    NewEvent, NewTransaction, StatisticRow, StatisticsFilter, SummaryFilter, TransactionFilter,
    TransactionRecord, TransactionSummary, TransactionType,
};

//================================================================================================//
//                                            TRAIT                                               //
//================================================================================================//

#[async_trait]
pub trait TransactionStore: std::fmt::Debug + Send + Sync {
    /// Atomic check-then-insert keyed on (chain_id, tx_hash). Returns
    /// `true` if this call created the row, `false` if it already existed.
    async fn insert_if_absent(&self, tx: &NewTransaction) -> Result<bool, StoreError>;

    /// Record a raw log into the audit `events` table, keyed on
    /// (chain_id, tx_hash, log_index). Insert-or-ignore.
    async fn insert_event(&self, event: &NewEvent) -> Result<bool, StoreError>;

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, StoreError>;

    /// Filtered, paginated read, newest timestamp first.
    async fn query(&self, filter: &TransactionFilter) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Aggregate over the filtered set, bucketed by kind.
    async fn summary(&self, filter: &SummaryFilter) -> Result<TransactionSummary, StoreError>;

    /// Last durably processed block for a chain's poll loop.
    async fn get_watermark(&self, chain_id: u64) -> Result<Option<u64>, StoreError>;

    async fn set_watermark(&self, chain_id: u64, block_number: u64) -> Result<(), StoreError>;

    /// Recompute the (date, chain, type) aggregates for one calendar day.
    async fn refresh_statistics(&self, date: NaiveDate) -> Result<u64, StoreError>;

    async fn query_statistics(
        &self,
        filter: &StatisticsFilter,
    ) -> Result<Vec<StatisticRow>, StoreError>;
}

//================================================================================================//
//                                          POSTGRES                                              //
//================================================================================================//

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id            BIGSERIAL PRIMARY KEY,
    tx_hash       VARCHAR(66) NOT NULL,
    chain_id      BIGINT NOT NULL,
    chain_name    VARCHAR(50) NOT NULL,
    block_number  BIGINT NOT NULL,
    timestamp     TIMESTAMPTZ NOT NULL,
    from_address  VARCHAR(42) NOT NULL,
    to_address    VARCHAR(42) NOT NULL,
    amount        NUMERIC(38, 6) NOT NULL,
    type          VARCHAR(20) NOT NULL,
    status        VARCHAR(20) NOT NULL DEFAULT 'CONFIRMED',
    source_chain  VARCHAR(50),
    target_chain  VARCHAR(50),
    message_hash  VARCHAR(66),
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (chain_id, tx_hash)
);
CREATE INDEX IF NOT EXISTS transactions_chain_id_idx  ON transactions (chain_id);
CREATE INDEX IF NOT EXISTS transactions_type_idx      ON transactions (type);
CREATE INDEX IF NOT EXISTS transactions_timestamp_idx ON transactions (timestamp DESC);

CREATE TABLE IF NOT EXISTS events (
    id               BIGSERIAL PRIMARY KEY,
    tx_hash          VARCHAR(66) NOT NULL,
    log_index        BIGINT NOT NULL,
    chain_id         BIGINT NOT NULL,
    contract_address VARCHAR(42) NOT NULL,
    event_name       VARCHAR(100) NOT NULL,
    topics           JSONB,
    data             JSONB,
    block_number     BIGINT NOT NULL,
    timestamp        TIMESTAMPTZ NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (chain_id, tx_hash, log_index)
);
CREATE INDEX IF NOT EXISTS events_tx_hash_idx  ON events (tx_hash);
CREATE INDEX IF NOT EXISTS events_chain_id_idx ON events (chain_id);

CREATE TABLE IF NOT EXISTS watermarks (
    chain_id             BIGINT PRIMARY KEY,
    last_processed_block BIGINT NOT NULL,
    updated_at           TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS statistics (
    id           BIGSERIAL PRIMARY KEY,
    date         DATE NOT NULL,
    chain_id     BIGINT NOT NULL,
    type         VARCHAR(20) NOT NULL,
    count        BIGINT NOT NULL DEFAULT 0,
    total_amount NUMERIC(38, 6) NOT NULL DEFAULT 0,
    avg_amount   NUMERIC(38, 6) NOT NULL DEFAULT 0,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (date, chain_id, type)
);
"#;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<Pool>,
}

impl PostgresStore {
    /// Build a pool from a `postgres://` URL, verify connectivity, and
    /// ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = Self::create_pool(database_url)?;
        let store = Self { pool: Arc::new(pool) };
        store.init_schema().await?;
        info!("Postgres store initialized");
        Ok(store)
    }

    fn create_pool(database_url: &str) -> Result<Pool, StoreError> {
        let url = url::Url::parse(database_url)
            .map_err(|e| StoreError::Config(format!("Invalid DATABASE_URL format: {}", e)))?;

        if url.scheme() != "postgres" && url.scheme() != "postgresql" {
            return Err(StoreError::Config(format!(
                "Invalid database scheme: expected 'postgres' or 'postgresql', got '{}'",
                url.scheme()
            )));
        }

        let mut pg_config = PgConfig::new();
        pg_config.host = Some(
            url.host_str()
                .ok_or_else(|| StoreError::Config("Missing host in DATABASE_URL".to_string()))?
                .to_string(),
        );
        pg_config.port = Some(url.port().unwrap_or(5432));
        pg_config.user = Some(if !url.username().is_empty() {
            url.username().to_string()
        } else {
            "postgres".to_string()
        });
        pg_config.password = url.password().map(|p| p.to_string());
        pg_config.dbname = Some(url.path().trim_start_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| Some("usdc_tracker".to_string()));

        pg_config.pool = Some(PoolConfig {
            max_size: 20,
            timeouts: deadpool_postgres::Timeouts {
                create: Some(Duration::from_secs(30)),
                wait: Some(Duration::from_secs(30)),
                recycle: Some(Duration::from_secs(300)),
            },
            ..Default::default()
        });

        pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Config(format!("Failed to create database pool: {}", e)))
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        conn.query_opt("SELECT 1 FROM transactions LIMIT 1", &[])
            .await?;
        Ok(())
    }

    fn row_to_record(row: &Row) -> Result<TransactionRecord, StoreError> {
        let tx_type: String = row.try_get("type")?;
        let status: String = row.try_get("status")?;
        let chain_id: i64 = row.try_get("chain_id")?;
        let block_number: i64 = row.try_get("block_number")?;
        Ok(TransactionRecord {
            id: row.try_get("id")?,
            tx_hash: row.try_get("tx_hash")?,
            chain_id: chain_id as u64,
            chain_name: row.try_get("chain_name")?,
            block_number: block_number as u64,
            timestamp: row.try_get("timestamp")?,
            from_address: row.try_get("from_address")?,
            to_address: row.try_get("to_address")?,
            amount: row.try_get("amount")?,
            tx_type: TransactionType::from_str(&tx_type).map_err(StoreError::Decode)?,
            status: status.parse().map_err(StoreError::Decode)?,
            source_chain: row.try_get("source_chain")?,
            target_chain: row.try_get("target_chain")?,
            message_hash: row.try_get("message_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

const RECORD_COLUMNS: &str = "id, tx_hash, chain_id, chain_name, block_number, timestamp, \
     from_address, to_address, amount, type, status, source_chain, target_chain, message_hash, \
     created_at, updated_at";

#[async_trait]
impl TransactionStore for PostgresStore {
    async fn insert_if_absent(&self, tx: &NewTransaction) -> Result<bool, StoreError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .execute(
                "INSERT INTO transactions \
                 (tx_hash, chain_id, chain_name, block_number, timestamp, from_address, \
                  to_address, amount, type, status, source_chain, target_chain, message_hash) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
                 ON CONFLICT (chain_id, tx_hash) DO NOTHING",
                &[
                    &tx.tx_hash,
                    &(tx.chain_id as i64),
                    &tx.chain_name,
                    &(tx.block_number as i64),
                    &tx.timestamp,
                    &tx.from_address,
                    &tx.to_address,
                    &tx.amount,
                    &tx.tx_type.as_str(),
                    &tx.status.as_str(),
                    &tx.source_chain,
                    &tx.target_chain,
                    &tx.message_hash,
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn insert_event(&self, event: &NewEvent) -> Result<bool, StoreError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .execute(
                "INSERT INTO events \
                 (tx_hash, log_index, chain_id, contract_address, event_name, topics, data, \
                  block_number, timestamp) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (chain_id, tx_hash, log_index) DO NOTHING",
                &[
                    &event.tx_hash,
                    &(event.log_index as i64),
                    &(event.chain_id as i64),
                    &event.contract_address,
                    &event.event_name,
                    &event.topics,
                    &event.data,
                    &(event.block_number as i64),
                    &event.timestamp,
                ],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Option<TransactionRecord>, StoreError> {
        let conn = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE tx_hash = $1 LIMIT 1",
            RECORD_COLUMNS
        );
        let row = conn.query_opt(sql.as_str(), &[&tx_hash]).await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn query(&self, filter: &TransactionFilter) -> Result<Vec<TransactionRecord>, StoreError> {
        let chain_id = filter.chain_id.map(|c| c as i64);
        let tx_type = filter.tx_type.map(|t| t.as_str().to_string());
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let offset = filter.offset.max(0);

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(ref c) = chain_id {
            params.push(c);
            clauses.push(format!("chain_id = ${}", params.len()));
        }
        if let Some(ref t) = tx_type {
            params.push(t);
            clauses.push(format!("type = ${}", params.len()));
        }
        if let Some(ref start) = filter.start_time {
            params.push(start);
            clauses.push(format!("timestamp >= ${}", params.len()));
        }
        if let Some(ref end) = filter.end_time {
            params.push(end);
            clauses.push(format!("timestamp <= ${}", params.len()));
        }

        let mut sql = format!("SELECT {} FROM transactions", RECORD_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let conn = self.pool.get().await?;
        let rows = conn.query(sql.as_str(), &params).await?;
        debug!(rows = rows.len(), "Transaction query executed");
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn summary(&self, filter: &SummaryFilter) -> Result<TransactionSummary, StoreError> {
        let chain_id = filter.chain_id.map(|c| c as i64);
        let tx_type = filter.tx_type.map(|t| t.as_str().to_string());

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(ref c) = chain_id {
            params.push(c);
            clauses.push(format!("chain_id = ${}", params.len()));
        }
        if let Some(ref t) = tx_type {
            params.push(t);
            clauses.push(format!("type = ${}", params.len()));
        }

        let mut sql = String::from(
            "SELECT COUNT(*) AS total_count, \
             COALESCE(SUM(amount) FILTER (WHERE type = 'CIRCLE_MINT'), 0) AS mint_amount, \
             COALESCE(SUM(amount) FILTER (WHERE type = 'CIRCLE_BURN'), 0) AS burn_amount, \
             COALESCE(SUM(amount) FILTER (WHERE type IN ('CCTP_MINT', 'CCTP_BURN')), 0) AS cctp_amount \
             FROM transactions",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let conn = self.pool.get().await?;
        let row = conn.query_one(sql.as_str(), &params).await?;
        Ok(TransactionSummary {
            total_count: row.try_get("total_count")?,
            mint_amount: row.try_get("mint_amount")?,
            burn_amount: row.try_get("burn_amount")?,
            cctp_amount: row.try_get("cctp_amount")?,
        })
    }

    async fn get_watermark(&self, chain_id: u64) -> Result<Option<u64>, StoreError> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT last_processed_block FROM watermarks WHERE chain_id = $1",
                &[&(chain_id as i64)],
            )
            .await?;
        Ok(row.map(|r| r.get::<_, i64>(0) as u64))
    }

    async fn set_watermark(&self, chain_id: u64, block_number: u64) -> Result<(), StoreError> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO watermarks (chain_id, last_processed_block, updated_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (chain_id) DO UPDATE SET \
               last_processed_block = EXCLUDED.last_processed_block, \
               updated_at = now()",
            &[&(chain_id as i64), &(block_number as i64)],
        )
        .await?;
        Ok(())
    }

    async fn refresh_statistics(&self, date: NaiveDate) -> Result<u64, StoreError> {
        let conn = self.pool.get().await?;
        let rows = conn
            .execute(
                "INSERT INTO statistics (date, chain_id, type, count, total_amount, avg_amount) \
                 SELECT $1::date, chain_id, type, COUNT(*), SUM(amount), AVG(amount) \
                 FROM transactions \
                 WHERE timestamp >= $1::date AND timestamp < ($1::date + INTERVAL '1 day') \
                 GROUP BY chain_id, type \
                 ON CONFLICT (date, chain_id, type) DO UPDATE SET \
                   count = EXCLUDED.count, \
                   total_amount = EXCLUDED.total_amount, \
                   avg_amount = EXCLUDED.avg_amount, \
                   updated_at = now()",
                &[&date],
            )
            .await?;
        Ok(rows)
    }

    async fn query_statistics(
        &self,
        filter: &StatisticsFilter,
    ) -> Result<Vec<StatisticRow>, StoreError> {
        let chain_id = filter.chain_id.map(|c| c as i64);
        let tx_type = filter.tx_type.map(|t| t.as_str().to_string());

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if let Some(ref d) = filter.date {
            params.push(d);
            clauses.push(format!("date = ${}", params.len()));
        }
        if let Some(ref c) = chain_id {
            params.push(c);
            clauses.push(format!("chain_id = ${}", params.len()));
        }
        if let Some(ref t) = tx_type {
            params.push(t);
            clauses.push(format!("type = ${}", params.len()));
        }

        let mut sql = String::from(
            "SELECT date, chain_id, type, count, total_amount, avg_amount FROM statistics",
        );
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY date DESC, chain_id, type");

        let conn = self.pool.get().await?;
        let rows = conn.query(sql.as_str(), &params).await?;
        rows.iter()
            .map(|row| {
                let tx_type: String = row.try_get("type")?;
                let chain_id: i64 = row.try_get("chain_id")?;
                Ok(StatisticRow {
                    date: row.try_get("date")?,
                    chain_id: chain_id as u64,
                    tx_type: TransactionType::from_str(&tx_type).map_err(StoreError::Decode)?,
                    count: row.try_get("count")?,
                    total_amount: row.try_get("total_amount")?,
                    avg_amount: row.try_get("avg_amount")?,
                })
            })
            .collect()
    }
}
