#![allow(dead_code)]

pub mod mocks;

use ethers::types::{Address, Bytes, Log, H256, U256};
use std::sync::Once;
use usdc_tracker::config::{
    ApiSettings, ChainConfig, Config, IngestionSettings, PerChainConfig, RateLimiterSettings,
};
use usdc_tracker::fetcher::TRANSFER_TOPIC;

static TRACING_INIT: Once = Once::new();

pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn tx_hash(byte: u8) -> H256 {
    H256::repeat_byte(byte)
}

pub fn usdc_address() -> Address {
    "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
        .parse()
        .unwrap()
}

/// Build a well-formed ERC-20 Transfer log.
pub fn transfer_log(
    block: u64,
    log_index: u64,
    from: Address,
    to: Address,
    raw_amount: u64,
    tx: H256,
) -> Log {
    let mut data = [0u8; 32];
    U256::from(raw_amount).to_big_endian(&mut data);
    Log {
        address: usdc_address(),
        topics: vec![*TRANSFER_TOPIC, H256::from(from), H256::from(to)],
        data: Bytes::from(data.to_vec()),
        block_number: Some(block.into()),
        transaction_hash: Some(tx),
        log_index: Some(log_index.into()),
        ..Default::default()
    }
}

pub fn test_chain(chain_id: u64, max_blocks_per_query: u64) -> PerChainConfig {
    PerChainConfig {
        chain_id,
        chain_name: format!("testchain-{}", chain_id),
        rpc_url: "http://localhost:8545".to_string(),
        usdc_address: usdc_address(),
        cctp_token_messenger: None,
        poll_enabled: false,
        start_block: None,
        rps_limit: None,
        max_concurrent_requests: None,
        max_blocks_per_query: Some(max_blocks_per_query),
        avg_block_time_seconds: None,
    }
}

pub fn test_ingestion_settings() -> IngestionSettings {
    IngestionSettings {
        max_blocks_per_query: 10,
        poll_interval_secs: 1,
        rpc_timeout_secs: 5,
        max_retries: 2,
        retry_backoff_ms: 10,
        timestamp_cache_size: 1_000,
        timestamp_cache_ttl_secs: 60,
        stats_interval_secs: 60,
    }
}

pub fn test_config(chains: Vec<PerChainConfig>) -> Config {
    Config {
        log_level: "info".to_string(),
        database_url: None,
        chain_config: ChainConfig {
            chains: chains
                .into_iter()
                .map(|c| (c.chain_name.clone(), c))
                .collect(),
            rate_limiter_settings: RateLimiterSettings::default(),
        },
        ingestion: test_ingestion_settings(),
        api: ApiSettings::default(),
    }
}
