//! Dubbing pipeline: durable queue, worker pool and stage runner.
//!
//! - `job_queue` claims, retries and settles queue entries
//! - `worker_pool` runs up to `max_workers` jobs, gated by `rate_limiter`
//! - `worker` executes the stages of one job
//! - `purge` drops finished queue entries and expired cache rows

mod job_queue;
mod poll;
mod progress;
mod purge;
mod rate_limiter;
mod speech;
mod worker;
mod worker_pool;

pub use job_queue::{
    DubbingRequest, FailureOutcome, JobQueue, QueueSnapshot, QueueStats, QueuedJob,
};
pub use poll::{PollPolicy, poll_until};
pub use progress::{JobProgressSnapshot, JobProgressUpdate, ProgressReporter};
pub use purge::{JobPurgeService, PurgeConfig, PurgeReport};
pub use rate_limiter::{RateLimiterConfig, StartRateLimiter};
pub use speech::{SynthesizedClip, plan_track};
pub use worker::{DubbingPipeline, PipelineConfig};
pub use worker_pool::{JobRunner, WorkerPool, WorkerPoolConfig};
