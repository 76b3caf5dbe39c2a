//! Bounded polling: wait for a condition at a fixed interval until a deadline.
//!
//! The condition is evaluated immediately, then once per interval. A `false`
//! (or `None`) result keeps polling; an error stops polling at once and is
//! returned unchanged. Nothing runs between ticks besides the sleep, and
//! evaluations never overlap.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

use crate::Error;

/// Default interval between condition evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default deadline for a single wait
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval and deadline for a bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between condition evaluations
    #[serde(with = "crate::config::duration_secs")]
    pub interval: Duration,
    /// Maximum total time to wait
    #[serde(with = "crate::config::duration_secs")]
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollConfig {
    /// Create a poll config with the given interval and timeout
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Poll until `check_fn` yields a value, fails, or the timeout elapses.
///
/// - `Ok(Some(value))` - condition met, returns `Ok(value)`
/// - `Ok(None)` - not yet, sleep one interval and try again
/// - `Err(e)` - returned immediately, no further evaluations
///
/// When the timeout has elapsed after an unsuccessful evaluation, returns
/// [`Error::Timeout`] naming `description`.
pub async fn wait_for<T, F, Fut>(
    config: PollConfig,
    description: &str,
    mut check_fn: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let start = Instant::now();

    loop {
        if let Some(value) = check_fn().await? {
            return Ok(value);
        }

        if start.elapsed() >= config.timeout {
            return Err(Error::timeout(description, config.timeout));
        }

        trace!(description, "condition not met yet");
        tokio::time::sleep(config.interval).await;
    }
}

/// Poll a boolean condition; see [`wait_for`] for the exact semantics.
pub async fn wait_until<F, Fut>(
    config: PollConfig,
    description: &str,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    wait_for(config, description, || {
        let fut = check_fn();
        async move { Ok(fut.await?.then_some(())) }
    })
    .await
}
