//! Database-backed job queue.
//!
//! Each dubbing job owns exactly one row in `job_queue`. The row carries the
//! attempt counter, the retry schedule and a coarse progress snapshot; the
//! authoritative job state lives in `jobs` and is kept in step here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use super::progress::{JobProgressSnapshot, JobProgressUpdate, ProgressReporter};
use crate::database::models::{QueueEntryDbModel, QueueState};
use crate::database::repositories::{JobRepository, QueueRepository};
use crate::database::time::{ms_after, ms_to_datetime};
use crate::domain::RetryPolicy;
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

const PROGRESS_FLUSH_INTERVAL_MS: u64 = 250;
const PROGRESS_CHANNEL_CAPACITY: usize = 1024;
const INTERRUPTED_FINAL_ATTEMPT: &str = "interrupted during its final attempt";

/// What a worker needs to know to run a job. Stored as the queue row payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DubbingRequest {
    pub job_id: String,
    pub content_hash: String,
    pub target_language: String,
    #[serde(default)]
    pub lipsync: bool,
}

/// A claimed queue entry.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub request: DubbingRequest,
    /// Attempts made so far, including the one just claimed.
    pub attempts: u32,
    pub max_attempts: u32,
}

impl QueuedJob {
    pub fn job_id(&self) -> &str {
        &self.request.job_id
    }
}

/// Queue-side view of a job for status polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub state: QueueState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub last_error: Option<String>,
    /// When a waiting or delayed entry becomes claimable.
    pub run_at: DateTime<Utc>,
}

/// Outcome of handing a failed attempt to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Another attempt is scheduled after `delay`.
    Retrying { attempt: u32, delay: Duration },
    /// The job is terminally failed.
    Failed,
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Durable, retrying job queue.
pub struct JobQueue {
    queue: Arc<dyn QueueRepository>,
    jobs: Arc<dyn JobRepository>,
    retry_policy: RetryPolicy,
    /// Wakes idle workers when something is enqueued.
    notify: Arc<Notify>,
    /// Latest progress snapshot per active job (in-memory).
    progress_cache: Arc<DashMap<String, JobProgressSnapshot>>,
    /// Jobs currently claimed by a worker. Progress for any other job is dropped.
    running: Arc<DashSet<String>>,
    progress_tx: mpsc::Sender<JobProgressUpdate>,
}

impl JobQueue {
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        jobs: Arc<dyn JobRepository>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let progress_cache = Arc::new(DashMap::new());
        let running = Arc::new(DashSet::new());
        spawn_progress_aggregator(
            queue.clone(),
            progress_rx,
            progress_cache.clone(),
            running.clone(),
        );

        Self {
            queue,
            jobs,
            retry_policy,
            notify: Arc::new(Notify::new()),
            progress_cache,
            running,
            progress_tx,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Create a progress reporter for a job.
    pub fn progress_reporter(&self, job_id: &str) -> ProgressReporter {
        ProgressReporter::new(job_id, self.progress_tx.clone())
    }

    /// Get a notifier for new jobs.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Admit a job. Returns `false` if the job is already waiting, delayed or running.
    pub async fn enqueue(&self, request: &DubbingRequest) -> Result<bool> {
        let payload = json::to_column(request)?;
        let admitted = self
            .queue
            .enqueue(
                &request.job_id,
                &payload,
                self.retry_policy.max_attempts,
            )
            .await?;

        if admitted {
            debug!(job_id = %request.job_id, "Job enqueued");
            self.notify.notify_one();
        } else {
            debug!(job_id = %request.job_id, "Job already queued; ignoring");
        }
        Ok(admitted)
    }

    /// Claim the next runnable job, if any.
    ///
    /// An entry whose payload cannot be decoded is failed on the spot and the
    /// next entry is tried.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>> {
        loop {
            let Some(entry) = self.queue.claim_next().await? else {
                return Ok(None);
            };
            match decode_entry(&entry) {
                Ok(job) => {
                    self.running.insert(job.job_id().to_string());
                    return Ok(Some(job));
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(job_id = %entry.job_id, error = %message, "Dropping undecodable queue entry");
                    self.jobs.mark_failed(&entry.job_id, &message).await?;
                    self.queue.fail(&entry.job_id, &message).await?;
                }
            }
        }
    }

    /// Mark the claimed attempt as successful.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        self.queue.complete(job_id).await?;
        self.finish(job_id);
        Ok(())
    }

    /// Stop tracking live progress for a finished attempt.
    fn finish(&self, job_id: &str) {
        // `running` first: the aggregator only caches while holding a `running` guard.
        self.running.remove(job_id);
        self.progress_cache.remove(job_id);
    }

    /// Record a failed attempt on both the job and its queue entry.
    ///
    /// Retryable errors with attempts left put the job back to `pending` and
    /// park the entry as `delayed`; anything else is terminal.
    pub async fn fail_or_retry(&self, job: &QueuedJob, error: &Error) -> Result<FailureOutcome> {
        let job_id = job.job_id();
        let message = error.to_string();
        self.finish(job_id);

        let retry = error.is_retryable() && job.attempts < job.max_attempts;
        if retry {
            let delay = self.retry_policy.delay_after_attempt(job.attempts);
            self.jobs.mark_retrying(job_id, &message).await?;
            self.queue
                .schedule_retry(job_id, ms_after(delay), &message)
                .await?;
            warn!(
                job_id = %job_id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Job attempt failed; retry scheduled"
            );
            return Ok(FailureOutcome::Retrying {
                attempt: job.attempts,
                delay,
            });
        }

        self.jobs.mark_failed(job_id, &message).await?;
        self.queue.fail(job_id, &message).await?;
        warn!(
            job_id = %job_id,
            attempt = job.attempts,
            retryable = error.is_retryable(),
            error = %message,
            "Job failed"
        );
        Ok(FailureOutcome::Failed)
    }

    /// Queue-side status of a job. Live progress of a running job takes
    /// precedence over the last flushed values.
    pub async fn get_status(&self, job_id: &str) -> Result<Option<QueueSnapshot>> {
        let Some(entry) = self.queue.get(job_id).await? else {
            return Ok(None);
        };
        let state = entry.queue_state().ok_or_else(|| {
            Error::Database(format!(
                "Unknown queue state '{}' for job {}",
                entry.state, job_id
            ))
        })?;

        let mut snapshot = QueueSnapshot {
            state,
            attempts: entry.attempts.max(0) as u32,
            max_attempts: entry.max_attempts.max(0) as u32,
            progress: entry.progress.clamp(0, 100) as u8,
            stage: entry.stage,
            message: entry.message,
            last_error: entry.last_error,
            run_at: ms_to_datetime(entry.run_at),
        };

        if state == QueueState::Active
            && let Some(live) = self.progress_cache.get(job_id)
            && live.percent >= snapshot.progress
        {
            snapshot.progress = live.percent;
            snapshot.stage = Some(live.stage.as_str().to_string());
            if live.message.is_some() {
                snapshot.message = live.message.clone();
            }
        }
        Ok(Some(snapshot))
    }

    /// Recover from an unclean shutdown.
    ///
    /// Entries left `active` go back to `waiting` and their jobs back to `pending`,
    /// unless the interrupted run was their last attempt; those jobs fail.
    pub async fn recover_jobs(&self) -> Result<u64> {
        let exhausted = self
            .queue
            .fail_exhausted_active(INTERRUPTED_FINAL_ATTEMPT)
            .await?;
        for job_id in &exhausted {
            self.jobs
                .mark_failed(job_id, INTERRUPTED_FINAL_ATTEMPT)
                .await?;
            warn!(job_id = %job_id, "Interrupted on its final attempt; job failed");
        }
        let entries = self.queue.recover_active().await?;
        if entries > 0 {
            info!("Returned {} interrupted queue entries to waiting", entries);
        }
        let jobs = self.jobs.reset_interrupted_jobs().await?;
        if jobs > 0 {
            info!("Reset {} interrupted jobs to pending", jobs);
        }
        self.running.clear();
        self.progress_cache.clear();
        if entries > 0 {
            self.notify.notify_waiters();
        }
        Ok(entries)
    }

    /// Get queue statistics.
    pub async fn get_stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats::default();
        for (state, count) in self.queue.count_by_state().await? {
            let count = count.max(0) as u64;
            match QueueState::parse(&state) {
                Some(QueueState::Waiting) => stats.waiting = count,
                Some(QueueState::Active) => stats.active = count,
                Some(QueueState::Delayed) => stats.delayed = count,
                Some(QueueState::Completed) => stats.completed = count,
                Some(QueueState::Failed) => stats.failed = count,
                None => warn!(state = %state, "Ignoring unknown queue state"),
            }
        }
        Ok(stats)
    }
}

fn decode_entry(entry: &QueueEntryDbModel) -> Result<QueuedJob> {
    let request: DubbingRequest = json::parse_strict(
        &entry.payload,
        JsonContext::QueuePayload {
            job_id: &entry.job_id,
        },
    )?;
    if request.job_id != entry.job_id {
        return Err(Error::validation(format!(
            "queue payload names job {} but is stored under {}",
            request.job_id, entry.job_id
        )));
    }
    Ok(QueuedJob {
        request,
        attempts: entry.attempts.max(0) as u32,
        max_attempts: entry.max_attempts.max(1) as u32,
    })
}

fn spawn_progress_aggregator(
    repo: Arc<dyn QueueRepository>,
    mut rx: mpsc::Receiver<JobProgressUpdate>,
    progress_cache: Arc<DashMap<String, JobProgressSnapshot>>,
    running: Arc<DashSet<String>>,
) {
    if tokio::runtime::Handle::try_current().is_err() {
        // Without a runtime the cache still serves live reads; nothing is flushed.
        return;
    }

    tokio::spawn(async move {
        let mut pending: HashMap<String, JobProgressSnapshot> = HashMap::new();
        let flush_every = Duration::from_millis(PROGRESS_FLUSH_INTERVAL_MS);
        let mut tick = tokio::time::interval(flush_every);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for (job_id, snapshot) in pending.drain() {
                        let message = snapshot.message.as_deref().unwrap_or_default();
                        if let Err(e) = repo
                            .update_progress(&job_id, snapshot.percent, snapshot.stage.as_str(), message)
                            .await
                        {
                            debug!(job_id = %job_id, error = %e, "Failed to flush job progress");
                        }
                    }
                }
                update = rx.recv() => {
                    let Some(update) = update else { break; };
                    // Late updates from a finished attempt must not resurrect its entry.
                    let Some(_running) = running.get(&update.job_id) else {
                        continue;
                    };
                    progress_cache.insert(update.job_id.clone(), update.snapshot.clone());
                    pending.insert(update.job_id, update.snapshot);
                }
            }
        }
    });
}
