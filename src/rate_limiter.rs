//! Per-chain rate limiting for outgoing JSON-RPC calls.
//!
//! Every RPC call funnels through a `ChainRateLimiter`, which enforces a
//! per-chain RPS quota, a global cross-chain quota, an optional concurrency
//! cap, a per-call timeout, and bounded retries with exponential backoff
//! when the provider signals throttling.

use crate::config::RateLimiterSettings;
use crate::errors::BlockchainError;
use crate::metrics::{RPC_LATENCY_HISTOGRAM, RPC_RETRIES_COUNTER};
use dashmap::DashMap;
use futures::Future;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, trace, warn};

const RATE_LIMIT_ERRORS: &[&str] = &[
    "rate limit",
    "too many requests",
    "exceeded",
    "429",
    "-32005",
    "You've exceeded the RPS limit",
];

#[derive(Debug)]
pub struct ChainRateLimiter {
    chain: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    global_limiter: Arc<DefaultDirectRateLimiter>,
    concurrency_limiter: Option<Arc<Semaphore>>,
    settings: Arc<RateLimiterSettings>,
}

impl ChainRateLimiter {
    pub fn new(
        chain: &str,
        rps_limit: Option<u32>,
        max_concurrent: Option<u32>,
        global_limiter: Arc<DefaultDirectRateLimiter>,
        settings: Arc<RateLimiterSettings>,
    ) -> Self {
        let base_rps_limit = rps_limit.unwrap_or(settings.default_chain_rps_limit);
        let max_concurrent = max_concurrent
            .unwrap_or(settings.default_max_concurrent_requests)
            .min(50);

        let quota = Quota::per_second(
            NonZeroU32::new(base_rps_limit)
                .unwrap_or_else(|| NonZeroU32::new(settings.default_chain_rps_limit.max(1)).unwrap()),
        )
        .allow_burst(
            NonZeroU32::new(settings.rate_limit_burst_size)
                .unwrap_or_else(|| NonZeroU32::new(5).unwrap()),
        );

        let rate_limiter = Arc::new(GovernorRateLimiter::direct(quota));

        let concurrency_limiter = if max_concurrent > 0 {
            Some(Arc::new(Semaphore::new(max_concurrent as usize)))
        } else {
            None
        };

        debug!(
            chain = chain,
            rps_limit = base_rps_limit,
            max_concurrent = max_concurrent,
            "Initialized chain rate limiter"
        );

        Self {
            chain: chain.to_string(),
            rate_limiter,
            global_limiter,
            concurrency_limiter,
            settings,
        }
    }

    async fn wait_on_limiter(
        &self,
        limiter: &DefaultDirectRateLimiter,
        limiter_name: &str,
        method_name: &str,
    ) -> Result<(), BlockchainError> {
        let wait_start = Instant::now();
        match timeout(
            Duration::from_secs(self.settings.rate_limit_timeout_secs),
            limiter.until_ready(),
        )
        .await
        {
            Ok(_) => {
                let wait_time = wait_start.elapsed();
                if wait_time.as_millis() > 1000 {
                    debug!(
                        chain = %self.chain,
                        method = method_name,
                        limiter = limiter_name,
                        wait_ms = wait_time.as_millis(),
                        "Long rate limit wait detected"
                    );
                }
                Ok(())
            }
            Err(_) => {
                error!(
                    chain = %self.chain,
                    method = method_name,
                    limiter = limiter_name,
                    timeout_secs = self.settings.rate_limit_timeout_secs,
                    "Rate limiter timed out"
                );
                Err(BlockchainError::RateLimit(format!(
                    "{} timeout after {} seconds",
                    limiter_name, self.settings.rate_limit_timeout_secs
                )))
            }
        }
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = (attempt as f64 * 7.0 % 10.0) / 10.0
            * self.settings.rate_limit_jitter_factor
            * self.settings.rate_limit_initial_backoff_ms as f64;
        let backoff_ms = (self.settings.rate_limit_initial_backoff_ms as f64
            * self
                .settings
                .rate_limit_backoff_multiplier
                .powf(attempt.saturating_sub(1) as f64)
            + jitter) as u64;
        Duration::from_millis(backoff_ms.min(self.settings.rate_limit_max_backoff_ms))
    }

    /// Execute an RPC call under quota, concurrency, and timeout control.
    ///
    /// Provider throttling errors are retried up to the configured bound
    /// with exponential backoff; timeouts and other errors surface
    /// immediately to the caller, whose retry policy applies.
    pub async fn execute_rpc_call<F, Fut, T>(
        &self,
        method_name: &str,
        call_fn: F,
    ) -> Result<T, BlockchainError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BlockchainError>>,
    {
        let start_time = Instant::now();

        let _permit = if let Some(ref sem) = self.concurrency_limiter {
            Some(sem.acquire().await.map_err(|_| {
                BlockchainError::RateLimit("Concurrency semaphore closed".to_string())
            })?)
        } else {
            None
        };

        self.wait_on_limiter(&self.global_limiter, "Global rate limiter", method_name)
            .await?;
        self.wait_on_limiter(&self.rate_limiter, "Per-chain rate limiter", method_name)
            .await?;

        let call_timeout = Duration::from_secs(self.settings.rpc_call_timeout_secs);
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.settings.rate_limit_max_retries {
            if attempt > 0 {
                RPC_RETRIES_COUNTER.with_label_values(&[method_name]).inc();
            }
            attempt += 1;

            trace!(
                chain = %self.chain,
                method = method_name,
                attempt = attempt,
                "Executing RPC call"
            );

            match timeout(call_timeout, call_fn()).await {
                Ok(Ok(result)) => {
                    RPC_LATENCY_HISTOGRAM
                        .with_label_values(&[method_name])
                        .observe(start_time.elapsed().as_secs_f64());
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    let error_str = e.to_string();
                    let is_rate_limit_error =
                        RATE_LIMIT_ERRORS.iter().any(|&pattern| error_str.contains(pattern));

                    if is_rate_limit_error && attempt < self.settings.rate_limit_max_retries {
                        let backoff = self.backoff_for_attempt(attempt);
                        warn!(
                            chain = %self.chain,
                            method = method_name,
                            attempt = attempt,
                            error = %error_str,
                            backoff_ms = backoff.as_millis(),
                            "Rate limit error, retrying with backoff"
                        );
                        sleep(backoff).await;
                        last_error = Some(e);
                        continue;
                    }

                    debug!(
                        chain = %self.chain,
                        method = method_name,
                        attempt = attempt,
                        error = %error_str,
                        "RPC call failed (non-retryable or max attempts)"
                    );
                    return Err(e);
                }
                Err(_) => {
                    // Timeouts are not retried here; the orchestrator owns
                    // that policy.
                    debug!(
                        chain = %self.chain,
                        method = method_name,
                        attempt = attempt,
                        timeout_secs = call_timeout.as_secs(),
                        "RPC call timed out"
                    );
                    return Err(BlockchainError::Timeout(call_timeout.as_secs()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BlockchainError::RateLimit(format!(
                "{}: retries exhausted after {} attempts",
                method_name, self.settings.rate_limit_max_retries
            ))
        }))
    }
}

//================================================================================================//
//                                       GLOBAL MANAGER                                           //
//================================================================================================//

#[derive(Debug)]
pub struct RateLimiterManager {
    limiters: DashMap<String, Arc<ChainRateLimiter>>,
    global_limiter: Arc<DefaultDirectRateLimiter>,
    settings: Arc<RateLimiterSettings>,
}

impl RateLimiterManager {
    pub fn new(settings: Arc<RateLimiterSettings>) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(settings.global_rps_limit.max(1)).unwrap(),
        );
        Self {
            limiters: DashMap::new(),
            global_limiter: Arc::new(GovernorRateLimiter::direct(quota)),
            settings,
        }
    }

    pub fn get_or_create(
        &self,
        chain: &str,
        rps_limit: Option<u32>,
        max_concurrent: Option<u32>,
    ) -> Arc<ChainRateLimiter> {
        self.limiters
            .entry(chain.to_string())
            .or_insert_with(|| {
                Arc::new(ChainRateLimiter::new(
                    chain,
                    rps_limit,
                    max_concurrent,
                    self.global_limiter.clone(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }
}

static GLOBAL_MANAGER: OnceLock<Arc<RateLimiterManager>> = OnceLock::new();

/// Initialize the process-wide rate limiter manager. Later calls are
/// ignored, so tests and binaries may call this unconditionally.
pub fn initialize_global_rate_limiter_manager(settings: Arc<RateLimiterSettings>) {
    let _ = GLOBAL_MANAGER.set(Arc::new(RateLimiterManager::new(settings)));
}

pub fn get_global_rate_limiter_manager() -> Arc<RateLimiterManager> {
    GLOBAL_MANAGER
        .get_or_init(|| Arc::new(RateLimiterManager::new(Arc::new(RateLimiterSettings::default()))))
        .clone()
}
