//! Bounded polling of long-running remote operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::{Error, Result};

/// How often to poll and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(600),
        }
    }
}

/// Call `check` until it yields a value, sleeping `interval` in between.
///
/// `check` returns `Ok(None)` while the operation is still running. Errors
/// from `check` end the loop immediately. When `max_wait` elapses without a
/// value the result is [`Error::Timeout`].
pub async fn poll_until<T, F, Fut>(operation: &str, policy: PollPolicy, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let mut polls: u32 = 0;
    loop {
        polls += 1;
        if let Some(value) = check().await? {
            return Ok(value);
        }
        let elapsed = started.elapsed();
        if elapsed + policy.interval > policy.max_wait {
            return Err(Error::timeout(operation, elapsed));
        }
        trace!(operation, polls, "Still waiting");
        tokio::time::sleep(policy.interval).await;
    }
}
