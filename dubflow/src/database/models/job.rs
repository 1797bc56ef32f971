//! Job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{Job, JobStatus};
use crate::{Error, Result};

/// Row of the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobDbModel {
    pub id: String,
    pub content_hash: String,
    pub original_filename: String,
    pub file_url: String,
    pub target_language: String,
    pub lipsync: bool,
    /// Status: pending, processing, completed, failed
    pub status: String,
    pub progress: i64,
    pub current_stage: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl From<&Job> for JobDbModel {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            content_hash: job.content_hash.clone(),
            original_filename: job.original_filename.clone(),
            file_url: job.file_url.clone(),
            target_language: job.target_language.clone(),
            lipsync: job.lipsync,
            status: job.status.as_str().to_string(),
            progress: i64::from(job.progress),
            current_stage: job.current_stage.clone(),
            error: job.error.clone(),
            created_at: datetime_to_ms(job.created_at),
            updated_at: datetime_to_ms(job.updated_at),
            completed_at: job.completed_at.map(datetime_to_ms),
        }
    }
}

impl TryFrom<JobDbModel> for Job {
    type Error = Error;

    fn try_from(row: JobDbModel) -> Result<Self> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            Error::Database(format!("job {} has unknown status '{}'", row.id, row.status))
        })?;
        Ok(Self {
            id: row.id,
            content_hash: row.content_hash,
            original_filename: row.original_filename,
            file_url: row.file_url,
            target_language: row.target_language,
            lipsync: row.lipsync,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            current_stage: row.current_stage,
            error: row.error,
            created_at: ms_to_datetime(row.created_at),
            updated_at: ms_to_datetime(row.updated_at),
            completed_at: row.completed_at.map(ms_to_datetime),
        })
    }
}
