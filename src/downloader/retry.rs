use rand::Rng;
use std::future::Future;
use std::time::Duration;
use crate::config::RetryConfig;
use crate::errors::{AppError, Result, RetryDisposition};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-indexed), before jitter.
    pub fn backoff_delay(&self, attempt: u32, base_delay: Duration) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }

    fn delay_for_attempt(&self, attempt: u32, base_delay: Duration) -> Duration {
        let delay = self.backoff_delay(attempt, base_delay);
        if !self.jitter {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// Runs an async operation with bounded, jittered exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// `operation` receives the 1-indexed attempt number.
    ///
    /// Fatal errors are returned as-is on the attempt that produced them. Once every
    /// attempt has failed, the last error comes back wrapped in `RetryExhausted`.
    pub async fn execute_with_retry<F, Fut, T>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        // 429 escalation only lives for this call.
        let mut base_delay = self.policy.base_delay;
        let mut attempt = 1;

        loop {
            log::info!("🔄 [RETRY] Attempt {}/{}: {}", attempt, max_attempts, label);

            let error = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("✅ [RETRY] {} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            log::warn!("⚠️ [RETRY] Attempt {} of {} failed: {}", attempt, label, error);

            match error.retry_disposition() {
                RetryDisposition::Fatal => {
                    log::error!("❌ [RETRY] {} failed with a non-retryable error", label);
                    return Err(error);
                }
                RetryDisposition::RetryEscalated => {
                    base_delay = base_delay.saturating_mul(2);
                    log::warn!("🐢 [RETRY] Rate limited, base delay raised to {:?}", base_delay);
                }
                RetryDisposition::Retry => {}
            }

            if attempt >= max_attempts {
                log::error!("❌ [RETRY] All {} attempts failed for {}", max_attempts, label);
                return Err(AppError::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.policy.delay_for_attempt(attempt, base_delay);
            log::info!("⏳ [RETRY] Retrying in {:?}...", delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
