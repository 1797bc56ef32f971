//! Rolling-window limiter for job starts.
//!
//! At most `max_starts` jobs may start within any `window`-long interval.
//! There is no burst credit as in a token bucket.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configuration for the start limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Starts allowed per window.
    pub max_starts: u32,
    /// Length of the rolling window.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_starts: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Rolling-window rate limiter shared by all workers.
#[derive(Debug)]
pub struct StartRateLimiter {
    config: RateLimiterConfig,
    starts: Mutex<VecDeque<Instant>>,
}

impl StartRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            starts: Mutex::new(VecDeque::with_capacity(config.max_starts as usize)),
            config,
        }
    }

    fn prune(&self, starts: &mut VecDeque<Instant>, now: Instant) {
        while starts
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.config.window)
        {
            starts.pop_front();
        }
    }

    /// How long until a start would be allowed; zero when the window has room.
    pub async fn ready_in(&self) -> Duration {
        if self.config.max_starts == 0 {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let mut starts = self.starts.lock().await;
        self.prune(&mut starts, now);
        if starts.len() < self.config.max_starts as usize {
            return Duration::ZERO;
        }
        let oldest = starts.front().copied().unwrap_or(now);
        self.config
            .window
            .saturating_sub(now.duration_since(oldest))
    }

    /// Record a start that has already happened.
    pub async fn record(&self) {
        if self.config.max_starts == 0 {
            return;
        }
        self.starts.lock().await.push_back(Instant::now());
    }

    /// Number of starts recorded in the current window.
    pub async fn in_window(&self) -> usize {
        let now = Instant::now();
        let starts = self.starts.lock().await;
        starts
            .iter()
            .filter(|t| now.duration_since(**t) < self.config.window)
            .count()
    }
}

impl Default for StartRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
