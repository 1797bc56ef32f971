//! Fixed-size worker pool that drains the job queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job_queue::{DubbingRequest, FailureOutcome, JobQueue};
use super::progress::ProgressReporter;
use super::rate_limiter::StartRateLimiter;
use super::worker::DubbingPipeline;
use crate::{Error, Result};

/// Runs one claimed job to completion.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, request: &DubbingRequest, reporter: &ProgressReporter) -> Result<()>;
}

#[async_trait]
impl JobRunner for DubbingPipeline {
    async fn run(&self, request: &DubbingRequest, reporter: &ProgressReporter) -> Result<()> {
        DubbingPipeline::run(self, request, reporter).await
    }
}

/// Configuration for a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent jobs.
    pub max_workers: usize,
    /// Job timeout in seconds.
    ///
    /// A run exceeding this is dropped at its next suspension point and
    /// handed to the retry logic as a timeout.
    pub job_timeout_secs: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            job_timeout_secs: 3600, // 1 hour
            poll_interval_ms: 1000,
        }
    }
}

/// A worker pool for processing jobs.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Jobs currently running.
    active_jobs: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_config(WorkerPoolConfig::default())
    }

    pub fn with_config(config: WorkerPoolConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker pool.
    pub fn start(
        &self,
        job_queue: Arc<JobQueue>,
        runner: Arc<dyn JobRunner>,
        rate_limiter: Arc<StartRateLimiter>,
    ) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let job_timeout = Duration::from_secs(self.config.job_timeout_secs);
        // Limit checks and claims happen under one lock so two workers cannot
        // both take the last start of a window.
        let dispatch = Arc::new(Mutex::new(()));

        info!(
            "Starting worker pool with {} max workers",
            self.config.max_workers
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool already stopped; not starting");
            return;
        };

        for i in 0..self.config.max_workers.max(1) {
            let semaphore = self.semaphore.clone();
            let cancellation_token = self.cancellation_token.clone();
            let job_queue = job_queue.clone();
            let runner = runner.clone();
            let rate_limiter = rate_limiter.clone();
            let dispatch = dispatch.clone();
            let active_jobs = self.active_jobs.clone();
            let notifier = job_queue.notifier();

            join_set.spawn(async move {
                debug!("Worker {} started", i);

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    // Wait for a job or timeout
                    tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = notifier.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }

                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        continue;
                    };

                    let claimed = {
                        let _dispatch = dispatch.lock().await;
                        let wait = rate_limiter.ready_in().await;
                        if !wait.is_zero() {
                            drop(_dispatch);
                            drop(permit);
                            debug!("Worker {} rate limited for {:?}", i, wait);
                            tokio::select! {
                                _ = cancellation_token.cancelled() => break,
                                _ = tokio::time::sleep(wait) => {}
                            }
                            continue;
                        }

                        match job_queue.dequeue().await {
                            Ok(Some(job)) => {
                                rate_limiter.record().await;
                                job
                            }
                            Ok(None) => continue,
                            Err(e) => {
                                error!("Error dequeuing job: {}", e);
                                continue;
                            }
                        }
                    };

                    let job_id = claimed.job_id().to_string();
                    debug!(
                        job_id = %job_id,
                        attempt = claimed.attempts,
                        "Worker {} processing job", i
                    );
                    active_jobs.fetch_add(1, Ordering::SeqCst);

                    let reporter = job_queue.progress_reporter(&job_id);
                    let result =
                        tokio::time::timeout(job_timeout, runner.run(&claimed.request, &reporter))
                            .await;

                    let settled = match result {
                        Ok(Ok(())) => job_queue.complete(&job_id).await.map(|_| None),
                        Ok(Err(e)) => job_queue.fail_or_retry(&claimed, &e).await.map(Some),
                        Err(_) => {
                            let e = Error::timeout("dubbing job", job_timeout);
                            job_queue.fail_or_retry(&claimed, &e).await.map(Some)
                        }
                    };
                    match settled {
                        Ok(None) => {}
                        Ok(Some(FailureOutcome::Retrying { attempt, delay })) => {
                            debug!(job_id = %job_id, attempt, ?delay, "Job will be retried");
                        }
                        Ok(Some(FailureOutcome::Failed)) => {}
                        Err(e) => error!(job_id = %job_id, error = %e, "Failed to record job outcome"),
                    }

                    active_jobs.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                }

                debug!("Worker {} shutting down", i);
            });
        }
    }

    /// Stop claiming jobs and wait for running ones to finish.
    pub async fn stop(&self) {
        info!("Stopping worker pool");
        self.cancellation_token.cancel();

        // Take the join set out of the mutex before awaiting
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Worker pool stopped");
    }

    /// Number of jobs currently running.
    pub fn active_count(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}
