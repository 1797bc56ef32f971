//! Service container for dependency injection.
//!
//! The ServiceContainer wires repositories, the job queue, the pipeline and
//! the background services, and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::dubbing::{DubbingService, DubbingServiceConfig};
use crate::Result;
use crate::cache::ExpiringCache;
use crate::config::AppConfig;
use crate::database::Repositories;
use crate::pipeline::{
    DubbingPipeline, JobPurgeService, JobQueue, QueueStats, StartRateLimiter, WorkerPool,
};
use crate::providers::Providers;
use crate::storage::BlobStorage;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    pub repositories: Repositories,
    pub job_queue: Arc<JobQueue>,
    pub dubbing_service: Arc<DubbingService>,
    pipeline: Arc<DubbingPipeline>,
    worker_pool: WorkerPool,
    rate_limiter: Arc<StartRateLimiter>,
    purge_service: JobPurgeService,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    pub fn new(
        pool: SqlitePool,
        config: &AppConfig,
        providers: Providers,
        storage: Arc<dyn BlobStorage>,
    ) -> Self {
        info!("Initializing service container");

        let repositories = Repositories::sqlx(pool.clone());
        let job_queue = Arc::new(JobQueue::new(
            repositories.queue.clone(),
            repositories.jobs.clone(),
            config.retry.clone(),
        ));

        let dubbing_service = Arc::new(DubbingService::new(
            DubbingServiceConfig {
                max_upload_bytes: config.max_upload_bytes,
                dedupe_in_flight: config.dedupe_in_flight,
            },
            repositories.clone(),
            job_queue.clone(),
            storage.clone(),
        ));

        let pipeline = Arc::new(DubbingPipeline::new(
            repositories.clone(),
            providers,
            storage,
            config.pipeline.clone(),
        ));

        let purge_service = JobPurgeService::new(
            config.purge.clone(),
            repositories.queue.clone(),
            ExpiringCache::new(repositories.cache.clone()),
        );

        Self {
            pool,
            job_queue,
            dubbing_service,
            pipeline,
            worker_pool: WorkerPool::with_config(config.worker.clone()),
            rate_limiter: Arc::new(StartRateLimiter::new(config.rate_limit.clone())),
            purge_service,
            repositories,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Recover interrupted work and start the background services.
    pub async fn initialize(&self) -> Result<()> {
        // Expired rows are never served; dropping them here keeps the table small.
        ExpiringCache::new(self.repositories.cache.clone())
            .purge_expired()
            .await?;

        let recovered = self.job_queue.recover_jobs().await?;
        if recovered > 0 {
            info!("Recovered {} interrupted jobs", recovered);
        }

        self.worker_pool.start(
            self.job_queue.clone(),
            self.pipeline.clone(),
            self.rate_limiter.clone(),
        );
        self.purge_service
            .start_background_task(self.cancellation_token.child_token());

        info!("Services initialized");
        Ok(())
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Stop claiming jobs, wait up to `timeout` for running ones, then close the pool.
    ///
    /// Jobs still running when the timeout hits stay `processing` and are
    /// picked up again by [`ServiceContainer::initialize`] on the next start.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        if tokio::time::timeout(timeout, self.worker_pool.stop())
            .await
            .is_err()
        {
            warn!(
                active = self.worker_pool.active_count(),
                "Shutdown timeout reached with jobs still running"
            );
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.job_queue.get_stats().await
    }
}
