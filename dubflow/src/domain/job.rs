//! Dubbing job entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a dubbing job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted and waiting for a worker (also used between retry attempts).
    Pending,
    /// A worker is running the pipeline.
    Processing,
    /// Every stage finished.
    Completed,
    /// Retries exhausted or a non-retryable error occurred.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One request to dub an uploaded file into one target language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub content_hash: String,
    pub original_filename: String,
    pub file_url: String,
    pub target_language: String,
    pub lipsync: bool,
    pub status: JobStatus,
    pub progress: u8,
    pub current_stage: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job with a fresh id.
    pub fn new(
        content_hash: impl Into<String>,
        original_filename: impl Into<String>,
        file_url: impl Into<String>,
        target_language: impl Into<String>,
        lipsync: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content_hash: content_hash.into(),
            original_filename: original_filename.into(),
            file_url: file_url.into(),
            target_language: target_language.into(),
            lipsync,
            status: JobStatus::Pending,
            progress: 0,
            current_stage: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
