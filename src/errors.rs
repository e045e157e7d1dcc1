//! # Centralized Error Handling
//!
//! This module defines the hierarchical error enums for the entire tracker.
//! Using a centralized, typed error system keeps failure semantics explicit
//! at every layer boundary and prevents the propagation of ambiguous
//! string-based errors.

use thiserror::Error;

/// The top-level error type, encapsulating all possible failures within the tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),
    #[error("System shut down")]
    Shutdown,
    #[error("Other error: {0}")]
    Other(String),
}

/// Errors raised while loading or validating configuration.
///
/// A per-chain configuration problem is fatal for that chain only; the
/// remaining chains continue to operate.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Chain '{chain}' is missing an RPC endpoint")]
    MissingRpcEndpoint { chain: String },
    #[error("Chain '{chain}' is missing a USDC contract address")]
    MissingUsdcAddress { chain: String },
    #[error("Duplicate chain id {chain_id} ('{chain}')")]
    DuplicateChainId { chain: String, chain_id: u64 },
    #[error("Unknown chain id: {0}")]
    UnknownChain(u64),
}

/// Errors from the JSON-RPC access layer.
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("RPC provider error: {0}")]
    Provider(String),
    #[error("RPC call timed out after {0} seconds")]
    Timeout(u64),
    #[error("Rate limit error: {0}")]
    RateLimit(String),
    #[error("Invalid block range: from {from} > to {to}")]
    InvalidRange { from: u64, to: u64 },
    #[error("Block {0} not found")]
    BlockNotFound(u64),
    #[error("Malformed log in tx {tx}: {reason}")]
    MalformedLog { tx: String, reason: String },
    #[error("Invalid provider URL: {0}")]
    InvalidUrl(String),
}

impl From<ethers::providers::ProviderError> for BlockchainError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        BlockchainError::Provider(err.to_string())
    }
}

/// Errors related to the persistence layer.
///
/// `Unavailable` is the retryable "store unreachable" case: the ingestion
/// side treats it as retryable, while the read API degrades to empty
/// results instead of surfacing it to callers.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Database query error: {0}")]
    Query(String),
    #[error("Row decoding error: {0}")]
    Decode(String),
    #[error("Invalid store configuration: {0}")]
    Config(String),
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

/// Errors from the ingestion orchestrator (backfill jobs and poll loops).
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Fetch failed after {attempts} attempts: {source}")]
    FetchFailed {
        attempts: u32,
        #[source]
        source: BlockchainError,
    },
    #[error("Store error during ingestion: {0}")]
    Store(#[from] StoreError),
    #[error("Listener for chain {0} is already running")]
    ListenerAlreadyRunning(u64),
}
