//! # Chain RPC Access
//!
//! A rate-limited, cache-backed interface to an EVM chain's JSON-RPC API.
//! This module's sole responsibility is low-level chain access: resolving
//! the head block, fetching logs, and resolving block timestamps. Range
//! partitioning and log decoding live in the fetcher; this layer stays
//! protocol-thin so it can be mocked in tests.

use crate::config::PerChainConfig;
use crate::errors::BlockchainError;
use crate::rate_limiter::{get_global_rate_limiter_manager, ChainRateLimiter};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{BlockNumber, Filter, Log},
};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Minimal chain access surface consumed by the fetcher and orchestrator.
#[async_trait]
pub trait EvmRpc: std::fmt::Debug + Send + Sync {
    fn chain_id(&self) -> u64;
    fn chain_name(&self) -> &str;

    /// Most recent block number known to the chain, resolved at call time.
    async fn get_latest_block_number(&self) -> Result<u64, BlockchainError>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, BlockchainError>;

    /// Unix timestamp of the given block.
    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, BlockchainError>;
}

/// `ethers`-backed implementation over an HTTP provider.
#[derive(Debug, Clone)]
pub struct EvmRpcClient {
    chain: Arc<PerChainConfig>,
    provider: Arc<Provider<Http>>,
    rate_limiter: Arc<ChainRateLimiter>,
    timestamp_cache: Cache<u64, u64>,
}

impl EvmRpcClient {
    pub fn new(
        chain: Arc<PerChainConfig>,
        timestamp_cache_size: u64,
        timestamp_cache_ttl: Duration,
    ) -> Result<Self, BlockchainError> {
        let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())
            .map_err(|e| BlockchainError::InvalidUrl(format!("{}: {}", chain.rpc_url, e)))?;

        let rate_limiter = get_global_rate_limiter_manager().get_or_create(
            &chain.chain_name,
            chain.rps_limit,
            chain.max_concurrent_requests,
        );

        Ok(Self {
            chain,
            provider: Arc::new(provider),
            rate_limiter,
            timestamp_cache: Cache::builder()
                .max_capacity(timestamp_cache_size)
                .time_to_live(timestamp_cache_ttl)
                .build(),
        })
    }
}

#[async_trait]
impl EvmRpc for EvmRpcClient {
    fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    fn chain_name(&self) -> &str {
        &self.chain.chain_name
    }

    #[instrument(skip(self), level = "debug", fields(chain = %self.chain.chain_name))]
    async fn get_latest_block_number(&self) -> Result<u64, BlockchainError> {
        self.rate_limiter
            .execute_rpc_call("get_block_number", || {
                let provider = self.provider.clone();
                async move {
                    provider
                        .get_block_number()
                        .await
                        .map(|n| n.as_u64())
                        .map_err(BlockchainError::from)
                }
            })
            .await
    }

    #[instrument(skip(self, filter), level = "debug", fields(chain = %self.chain.chain_name))]
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, BlockchainError> {
        self.rate_limiter
            .execute_rpc_call("get_logs", || {
                let provider = self.provider.clone();
                let filter = filter.clone();
                async move { provider.get_logs(&filter).await.map_err(BlockchainError::from) }
            })
            .await
    }

    #[instrument(skip(self), level = "debug", fields(chain = %self.chain.chain_name, block = block_number))]
    async fn get_block_timestamp(&self, block_number: u64) -> Result<u64, BlockchainError> {
        if let Some(cached) = self.timestamp_cache.get(&block_number).await {
            return Ok(cached);
        }

        let block = self
            .rate_limiter
            .execute_rpc_call("get_block", || {
                let provider = self.provider.clone();
                async move {
                    provider
                        .get_block(BlockNumber::Number(block_number.into()))
                        .await
                        .map_err(BlockchainError::from)
                }
            })
            .await?
            .ok_or(BlockchainError::BlockNotFound(block_number))?;

        let timestamp = block.timestamp.as_u64();
        self.timestamp_cache.insert(block_number, timestamp).await;
        Ok(timestamp)
    }
}
