//! Fixed-count retry with a fixed delay.
//!
//! Used for manifests applied while the API server may still be settling,
//! e.g. custom resources whose CRDs were registered moments earlier. There is
//! no jitter and no growth: attempt count and delay are exact.
//!
//! # Example
//!
//! ```ignore
//! use everest_provisioner::retry::{retry_with_backoff, RetryConfig};
//!
//! let result = retry_with_backoff(
//!     &RetryConfig::default(),
//!     "apply vmagent rbac",
//!     || async { connector.apply_manifest(&bytes).await },
//! ).await?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Default number of attempts for apply-with-retry
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between apply attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Configuration for operations retried a fixed number of times.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay between consecutive attempts
    #[serde(with = "crate::config::duration_secs")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt count and delay
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Execute an async operation up to `max_attempts` times.
///
/// Sleeps exactly `config.delay` between attempts and never after the last
/// one. Returns the first success, or the error of the final attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = config.delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(config.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let config = RetryConfig::fixed(3, Duration::from_secs(10));
        let result: Result<i32, &str> =
            retry_with_backoff(&config, "op", || async { Ok(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let config = RetryConfig::fixed(3, Duration::from_secs(10));
        let result: Result<i32, &str> = retry_with_backoff(&config, "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("fail")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    /// Three attempts, the last error surfaces, and exactly two delays elapse.
    #[tokio::test(start_paused = true)]
    async fn test_exhausts_max_attempts_with_two_waits() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let start = tokio::time::Instant::now();

        let config = RetryConfig::default();
        let result: Result<i32, String> = retry_with_backoff(&config, "op", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("attempt {} failed", n))
            }
        })
        .await;

        assert_eq!(result, Err("attempt 3 failed".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= DEFAULT_RETRY_DELAY * 2);
        assert!(elapsed < DEFAULT_RETRY_DELAY * 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let config = RetryConfig::fixed(0, Duration::from_millis(1));

        let result: Result<(), &str> = retry_with_backoff(&config, "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
