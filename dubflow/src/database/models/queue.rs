//! Job queue database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// State of a queue entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Ready to be claimed.
    Waiting,
    /// Claimed by a worker.
    Active,
    /// Waiting for its retry backoff to elapse.
    Delayed,
    Completed,
    Failed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "active" => Some(Self::Active),
            "delayed" => Some(Self::Delayed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Row of the `job_queue` table. The job id doubles as the dedup key.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueEntryDbModel {
    pub job_id: String,
    /// JSON payload handed to the worker
    pub payload: String,
    pub state: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_at: i64,
    pub progress: i64,
    pub stage: Option<String>,
    pub message: Option<String>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

impl QueueEntryDbModel {
    pub fn queue_state(&self) -> Option<QueueState> {
        QueueState::parse(&self.state)
    }
}
