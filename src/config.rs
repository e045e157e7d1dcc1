//! # Modular Configuration System
//!
//! Settings load from a directory of specialized JSON files (`main.json`
//! for process-wide settings, `chains.json` for the chain registry). The
//! `Config` struct is the single source of truth for all tunables: nothing
//! in the core pipeline hardcodes an endpoint, contract address, batch
//! size, or page size.

use ethers::types::Address;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::errors::ConfigError;

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub database_url: Option<String>,
    pub chain_config: ChainConfig,
    #[serde(default)]
    pub ingestion: IngestionSettings,
    #[serde(default)]
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MainConfig {
    log_level: Option<String>,
    database_url: Option<String>,
    #[serde(default)]
    ingestion: IngestionSettings,
    #[serde(default)]
    api: ApiSettings,
}

impl Config {
    /// Load configuration from a directory containing `main.json` and
    /// `chains.json`.
    pub async fn load_from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let main_config: MainConfig = Self::load_file(dir.join("main.json")).await?;
        let chain_config: ChainConfig = Self::load_file(dir.join("chains.json")).await?;

        Ok(Self {
            log_level: main_config.log_level.unwrap_or_else(default_log_level),
            database_url: main_config.database_url,
            chain_config,
            ingestion: main_config.ingestion,
            api: main_config.api,
        })
    }

    async fn load_file<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from JSON: {}", path.as_ref().display()))
    }

    /// Database URL from config, falling back to the `DATABASE_URL`
    /// environment variable.
    pub fn database_url(&self) -> Option<String> {
        self.database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }

    /// Validate the chain registry, removing invalid entries.
    ///
    /// A misconfigured chain is fatal for that chain only; the returned
    /// errors let the caller log what was dropped while the remaining
    /// chains continue.
    pub fn validate_chains(&mut self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut seen_ids: HashSet<u64> = HashSet::new();

        self.chain_config.chains.retain(|name, chain| {
            if chain.rpc_url.trim().is_empty() {
                errors.push(ConfigError::MissingRpcEndpoint { chain: name.clone() });
                return false;
            }
            if chain.usdc_address == Address::zero() {
                errors.push(ConfigError::MissingUsdcAddress { chain: name.clone() });
                return false;
            }
            if !seen_ids.insert(chain.chain_id) {
                errors.push(ConfigError::DuplicateChainId {
                    chain: name.clone(),
                    chain_id: chain.chain_id,
                });
                return false;
            }
            true
        });

        for err in &errors {
            warn!(error = %err, "Dropping misconfigured chain");
        }
        errors
    }

    /// The static chain registry: every validated chain, in a stable order.
    pub fn list_chains(&self) -> Vec<&PerChainConfig> {
        let mut chains: Vec<&PerChainConfig> = self.chain_config.chains.values().collect();
        chains.sort_by_key(|c| c.chain_id);
        chains
    }

    pub fn get_chain_by_id(&self, chain_id: u64) -> Result<&PerChainConfig, ConfigError> {
        self.chain_config
            .chains
            .values()
            .find(|c| c.chain_id == chain_id)
            .ok_or(ConfigError::UnknownChain(chain_id))
    }

    /// Effective maximum block span per `eth_getLogs` call for a chain.
    pub fn max_blocks_per_query(&self, chain: &PerChainConfig) -> u64 {
        chain
            .max_blocks_per_query
            .unwrap_or(self.ingestion.max_blocks_per_query)
            .max(1)
    }
}

//================================================================================================//
//                                       Chain Registry                                           //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chains: HashMap<String, PerChainConfig>,
    #[serde(default)]
    pub rate_limiter_settings: RateLimiterSettings,
}

/// Static per-chain entry. Addresses deserialize into fixed 20-byte
/// `Address` values, so downstream comparisons (zero-address checks,
/// contract keying) are byte comparisons and hex casing in the config file
/// never matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerChainConfig {
    pub chain_id: u64,
    pub chain_name: String,
    pub rpc_url: String,
    pub usdc_address: Address,
    pub cctp_token_messenger: Option<Address>,
    /// Whether the continuous poll loop starts for this chain at boot.
    #[serde(default)]
    pub poll_enabled: bool,
    /// First block a poll loop scans when no watermark exists yet.
    pub start_block: Option<u64>,
    pub rps_limit: Option<u32>,
    pub max_concurrent_requests: Option<u32>,
    pub max_blocks_per_query: Option<u64>,
    pub avg_block_time_seconds: Option<f64>,
}

//================================================================================================//
//                                     Ingestion Settings                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    /// Maximum block span per `eth_getLogs` call. Public providers commonly
    /// cap this, so the fetcher partitions wider requests into sub-ranges
    /// of at most this many blocks.
    #[serde(default = "default_max_blocks_per_query")]
    pub max_blocks_per_query: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Per-call RPC timeout.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Immediate retries the orchestrator attempts before surfacing a
    /// fetch failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_timestamp_cache_size")]
    pub timestamp_cache_size: u64,
    #[serde(default = "default_timestamp_cache_ttl_secs")]
    pub timestamp_cache_ttl_secs: u64,
    /// Interval between statistics aggregation passes.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_blocks_per_query: default_max_blocks_per_query(),
            poll_interval_secs: default_poll_interval_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timestamp_cache_size: default_timestamp_cache_size(),
            timestamp_cache_ttl_secs: default_timestamp_cache_ttl_secs(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

//================================================================================================//
//                                        API Settings                                            //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    /// Shared secret for the operator control endpoints. When unset, the
    /// control surface denies all callers.
    pub admin_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            metrics_port: default_metrics_port(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            admin_token: None,
        }
    }
}

//================================================================================================//
//                                    Rate Limiter Settings                                       //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSettings {
    #[serde(default = "default_global_rps_limit")]
    pub global_rps_limit: u32,
    #[serde(default = "default_chain_rps_limit")]
    pub default_chain_rps_limit: u32,
    #[serde(default = "default_max_concurrent_requests")]
    pub default_max_concurrent_requests: u32,
    #[serde(default = "default_burst_size")]
    pub rate_limit_burst_size: u32,
    #[serde(default = "default_rate_limit_timeout_secs")]
    pub rate_limit_timeout_secs: u64,
    #[serde(default = "default_rate_limit_max_retries")]
    pub rate_limit_max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub rate_limit_initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub rate_limit_backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub rate_limit_max_backoff_ms: u64,
    #[serde(default = "default_jitter_factor")]
    pub rate_limit_jitter_factor: f64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_call_timeout_secs: u64,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            global_rps_limit: default_global_rps_limit(),
            default_chain_rps_limit: default_chain_rps_limit(),
            default_max_concurrent_requests: default_max_concurrent_requests(),
            rate_limit_burst_size: default_burst_size(),
            rate_limit_timeout_secs: default_rate_limit_timeout_secs(),
            rate_limit_max_retries: default_rate_limit_max_retries(),
            rate_limit_initial_backoff_ms: default_initial_backoff_ms(),
            rate_limit_backoff_multiplier: default_backoff_multiplier(),
            rate_limit_max_backoff_ms: default_max_backoff_ms(),
            rate_limit_jitter_factor: default_jitter_factor(),
            rpc_call_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

//================================================================================================//
//                                          Defaults                                              //
//================================================================================================//

fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_blocks_per_query() -> u64 {
    10
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_rpc_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_timestamp_cache_size() -> u64 {
    10_000
}
fn default_timestamp_cache_ttl_secs() -> u64 {
    3_600
}
fn default_stats_interval_secs() -> u64 {
    300
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_page_size() -> i64 {
    20
}
fn default_max_page_size() -> i64 {
    100
}
fn default_global_rps_limit() -> u32 {
    100
}
fn default_chain_rps_limit() -> u32 {
    10
}
fn default_max_concurrent_requests() -> u32 {
    16
}
fn default_burst_size() -> u32 {
    5
}
fn default_rate_limit_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_jitter_factor() -> f64 {
    0.1
}
