//! Retry logic with exponential backoff
//!
//! [`RetryExecutor`] wraps every call to an upstream market-data provider.
//! Backoff sleeps run on the caller's task and can be aborted through a
//! [`CancelToken`] or a deadline. An optional token-bucket limiter shared
//! between executors keeps concurrent callers of one provider inside a
//! common request budget.

use crate::error::{MarketError, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Token bucket shared by every caller of one upstream provider
pub type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Build a limiter allowing `per_minute` requests per minute
pub fn rate_limiter(per_minute: u32) -> SharedRateLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt; `max_retries + 1` invocations at most
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound on any single delay
    pub max_delay: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry policy
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            multiplier,
        }
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Create a policy with fast retries (for testing)
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(MarketError::Configuration(format!(
                "retry multiplier must be finite and >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(MarketError::Configuration(
                "retry base_delay must not exceed max_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based)
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt - 1))`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

/// Cooperative cancellation for in-flight retry loops
///
/// Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`CancelToken::cancel`] has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender lives in `self`, so `wait_for` only errors if dropped
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Runs fallible async operations under a [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    limiter: Option<SharedRateLimiter>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            limiter: None,
        }
    }

    /// Share a request budget with other executors
    pub fn with_rate_limiter(mut self, limiter: SharedRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an async operation with retry logic
    ///
    /// Returns the first success, the first non-retryable error untouched, or
    /// [`MarketError::RetriesExhausted`] wrapping the last failure.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(operation_name, operation, std::future::pending::<()>())
            .await
    }

    /// Like [`RetryExecutor::execute`], aborting when `token` fires
    pub async fn execute_cancellable<F, Fut, T>(
        &self,
        operation_name: &str,
        token: &CancelToken,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(operation_name, operation, token.cancelled()).await
    }

    /// Like [`RetryExecutor::execute`], aborting once `deadline` passes
    pub async fn execute_with_deadline<F, Fut, T>(
        &self,
        operation_name: &str,
        deadline: Instant,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(operation_name, operation, tokio::time::sleep_until(deadline))
            .await
    }

    async fn run<F, Fut, T, C>(&self, operation_name: &str, mut operation: F, abort: C) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Future<Output = ()>,
    {
        tokio::pin!(abort);
        let total = self.config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    () = limiter.until_ready() => {}
                    () = &mut abort => return Err(MarketError::Cancelled(operation_name.to_string())),
                }
            }

            debug!(
                "Attempt {}/{} for operation: {}",
                attempt, total, operation_name
            );

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            "Operation '{}' succeeded after {} retries",
                            operation_name,
                            attempt - 1
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                debug!(
                    "Operation '{}' failed with non-retryable error: {}",
                    operation_name, error
                );
                return Err(error);
            }

            if attempt >= total {
                warn!(
                    "Operation '{}' failed after {} attempts: {}",
                    operation_name, attempt, error
                );
                return Err(MarketError::RetriesExhausted {
                    operation: operation_name.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let backoff = self.config.delay_for(attempt);
            warn!(
                "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                operation_name, attempt, total, error, backoff
            );

            tokio::select! {
                () = sleep(backoff) => {}
                () = &mut abort => {
                    debug!("Operation '{}' cancelled during backoff", operation_name);
                    return Err(MarketError::Cancelled(operation_name.to_string()));
                }
            }
        }
    }
}
