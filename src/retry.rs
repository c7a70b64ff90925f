/// Bounded exponential-backoff retry for adapter operations
///
/// One generic executor serves every call site, so backoff, classification
/// and cancellation behave identically whether the wrapped operation is a
/// cache read, a publish or a whole routed request.

use crate::config::ConfigError;
use crate::error::{ThroomError, ThroomResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for a single retried call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt
    #[serde(rename = "initial_delay_ms", with = "crate::utils::duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound for any single wait
    #[serde(rename = "max_delay_ms", with = "crate::utils::duration_ms")]
    pub max_delay: Duration,
    /// Growth factor applied to the wait after each retryable failure
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }

        if !(self.multiplier >= 1.0) {
            return Err(ConfigError::ValidationError(
                "retry multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.initial_delay > self.max_delay {
            return Err(ConfigError::ValidationError(
                "retry initial_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Wait that follows `delay`, capped at `max_delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let grown = delay.as_secs_f64() * self.multiplier;
        if !grown.is_finite() || grown >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(grown)
        }
    }
}

/// Run `op` under `config`, retrying errors that [`ThroomError::is_retryable`] accepts
pub async fn retry<T, F, Fut>(config: &RetryConfig, op: F) -> ThroomResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ThroomResult<T>>,
{
    retry_until(config, std::future::pending::<()>(), op).await
}

/// Like [`retry`], but a backoff wait is abandoned as soon as `cancel` resolves
pub async fn retry_until<T, F, Fut, C>(config: &RetryConfig, cancel: C, op: F) -> ThroomResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ThroomResult<T>>,
    C: Future<Output = ()>,
{
    retry_with(config, cancel, ThroomError::is_retryable, op).await
}

/// Fully parameterized executor: custom classification predicate and cancellation signal.
///
/// The last observed error is returned verbatim once attempts run out or a
/// non-retryable error is seen. Cancellation during a wait yields
/// [`ThroomError::Cancelled`] instead.
pub async fn retry_with<T, F, Fut, C, P>(
    config: &RetryConfig,
    cancel: C,
    is_retryable: P,
    mut op: F,
) -> ThroomResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ThroomResult<T>>,
    C: Future<Output = ()>,
    P: Fn(&ThroomError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    tokio::pin!(cancel);

    let mut attempt = 1;
    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_retryable(&error) {
            debug!(attempt, error = %error, "Non-retryable failure, giving up");
            return Err(error);
        }

        if attempt >= max_attempts {
            warn!(
                attempts = attempt,
                severity = %error.severity(),
                error = %error,
                "Retry attempts exhausted"
            );
            return Err(error);
        }

        debug!(attempt, ?delay, error = %error, "Transient failure, backing off");

        tokio::select! {
            biased;
            _ = &mut cancel => {
                debug!(attempt, "Retry cancelled during backoff");
                return Err(ThroomError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        delay = config.next_delay(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_secs(2));
        assert_eq!(config.multiplier, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RetryConfig::default();
        config.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = RetryConfig::default();
        config.initial_delay = Duration::from_secs(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_next_delay_is_capped() {
        let config = RetryConfig::new(5, Duration::from_millis(100), Duration::from_millis(300), 2.0);
        assert_eq!(config.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(config.next_delay(Duration::from_millis(200)), Duration::from_millis(300));
        assert_eq!(config.next_delay(Duration::from_millis(300)), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_exhausts_attempts() {
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: ThroomResult<()> = retry(&config, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ThroomError::connection_failed("refused"))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert!(matches!(result, Err(ThroomError::ConnectionFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let config = RetryConfig::default();
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: ThroomResult<()> = retry(&config, || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ThroomError::backend("syntax error at or near SELEC"))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(result, Err(ThroomError::Backend { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let config = RetryConfig::new(5, Duration::from_millis(50), Duration::from_secs(1), 2.0);
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry(&config, || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ThroomError::timeout("GET"))
                } else {
                    Ok("value")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_are_capped_by_max_delay() {
        let config = RetryConfig::new(5, Duration::from_secs(1), Duration::from_secs(2), 3.0);
        let started = Instant::now();

        let result: ThroomResult<()> =
            retry(&config, || async { Err(ThroomError::service_unavailable("db")) }).await;

        assert!(result.is_err());
        // 1s, then 2s three times
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let config = RetryConfig::new(3, Duration::from_secs(10), Duration::from_secs(10), 1.0);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: ThroomResult<()> = retry_until(
            &config,
            tokio::time::sleep(Duration::from_secs(1)),
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ThroomError::connection_failed("refused"))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(ThroomError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let config = RetryConfig::new(4, Duration::from_millis(1), Duration::from_millis(1), 1.0);
        let calls = Arc::new(AtomicU32::new(0));

        let result: ThroomResult<()> = retry_with(
            &config,
            std::future::pending::<()>(),
            |e| matches!(e, ThroomError::Backend { .. }),
            || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ThroomError::backend("LOADING Redis is loading the dataset"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
