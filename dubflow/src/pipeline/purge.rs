//! Background cleanup of finished queue entries and expired cache entries.
//!
//! Queue rows of completed or failed jobs are kept for `retention_days` so
//! their last status stays visible, then deleted in batches. Job rows and
//! everything hanging off them are never touched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::cache::ExpiringCache;
use crate::database::repositories::QueueRepository;
use crate::database::time::days_ago_ms;

/// Configuration for purging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Days to keep finished queue entries. 0 keeps them forever.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Batch size for deletion to avoid long-running transactions.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Interval between purge runs in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    7
}

fn default_batch_size() -> u32 {
    100
}

fn default_check_interval_secs() -> u64 {
    3600 // 1 hour
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            batch_size: default_batch_size(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl PurgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_check_interval_secs(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }
}

/// What one purge run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub queue_entries: u64,
    pub cache_entries: u64,
}

#[derive(Clone)]
pub struct JobPurgeService {
    config: PurgeConfig,
    queue: Arc<dyn QueueRepository>,
    cache: ExpiringCache,
}

impl JobPurgeService {
    pub fn new(config: PurgeConfig, queue: Arc<dyn QueueRepository>, cache: ExpiringCache) -> Self {
        Self {
            config,
            queue,
            cache,
        }
    }

    /// Run a single purge operation.
    pub async fn run_purge(&self) -> Result<PurgeReport> {
        let mut report = PurgeReport {
            cache_entries: self.cache.purge_expired().await?,
            ..Default::default()
        };

        if self.config.retention_days == 0 {
            debug!("Queue purging disabled (retention_days = 0)");
            return Ok(report);
        }

        let cutoff = days_ago_ms(self.config.retention_days);
        let batch_size = self.config.batch_size.max(1);
        loop {
            let deleted = self.queue.purge_finished(cutoff, batch_size).await?;
            report.queue_entries += deleted;

            if deleted < u64::from(batch_size) {
                break;
            }

            // Small delay between batches to reduce database load
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if report.queue_entries > 0 {
            info!(
                "Purged {} finished queue entries (retention: {} days)",
                report.queue_entries, self.config.retention_days
            );
        } else {
            debug!("No queue entries to purge");
        }

        Ok(report)
    }

    /// Start the background purge task.
    pub fn start_background_task(&self, cancellation_token: CancellationToken) {
        let service = self.clone();

        tokio::spawn(async move {
            let mut check_interval =
                interval(Duration::from_secs(service.config.check_interval_secs.max(1)));

            info!(
                "Job purge service started (retention: {} days, interval: {}s)",
                service.config.retention_days, service.config.check_interval_secs
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Job purge service shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        if let Err(e) = service.run_purge().await {
                            error!("Purge cycle failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }
}
