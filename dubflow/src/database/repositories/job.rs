//! Job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::JobDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;
use crate::domain::{Job, JobStatus, Stage};
use crate::{Error, Result};

/// Job repository trait.
///
/// Every state change is a single conditional `UPDATE` keyed by job id, so two
/// workers can never move the same job through conflicting transitions.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<Job>;
    /// Most recently completed job for `(content_hash, target_language)`.
    async fn find_completed(&self, content_hash: &str, target_language: &str)
    -> Result<Option<Job>>;
    /// Oldest pending or processing job for `(content_hash, target_language)`.
    async fn find_in_flight(&self, content_hash: &str, target_language: &str)
    -> Result<Option<Job>>;
    /// `pending -> processing`; also accepts a job already `processing` (recovered run).
    async fn mark_processing(&self, id: &str) -> Result<()>;
    /// Record a stage checkpoint. Progress never decreases.
    async fn update_progress(&self, id: &str, progress: u8, stage: Stage) -> Result<()>;
    async fn mark_completed(&self, id: &str) -> Result<()>;
    /// Attempt failed but another will follow: back to `pending`, error kept for display.
    async fn mark_retrying(&self, id: &str, error: &str) -> Result<()>;
    async fn mark_failed(&self, id: &str, error: &str) -> Result<()>;
    /// `completed|failed -> pending` for an explicit re-dub request.
    async fn reset_for_redub(&self, id: &str) -> Result<Job>;
    /// Return jobs left `processing` by a crashed process to `pending`.
    async fn reset_interrupted_jobs(&self) -> Result<u64>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Resolve a zero-row conditional update into NotFound or InvalidStateTransition.
    async fn transition_error(&self, id: &str, to: JobStatus) -> Error {
        match self.get_job(id).await {
            Ok(job) => Error::InvalidStateTransition {
                from: job.status.to_string(),
                to: to.to_string(),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let row = JobDbModel::from(job);
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, content_hash, original_filename, file_url, target_language, lipsync,
                status, progress, current_stage, error, created_at, updated_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.content_hash)
        .bind(&row.original_filename)
        .bind(&row.file_url)
        .bind(&row.target_language)
        .bind(row.lipsync)
        .bind(&row.status)
        .bind(row.progress)
        .bind(&row.current_stage)
        .bind(&row.error)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Job> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))?
            .try_into()
    }

    async fn find_completed(
        &self,
        content_hash: &str,
        target_language: &str,
    ) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM jobs
            WHERE content_hash = ? AND target_language = ? AND status = 'completed'
            ORDER BY completed_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .bind(target_language)
        .fetch_optional(&self.pool)
        .await?
        .map(Job::try_from)
        .transpose()
    }

    async fn find_in_flight(
        &self,
        content_hash: &str,
        target_language: &str,
    ) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM jobs
            WHERE content_hash = ? AND target_language = ? AND status IN ('pending', 'processing')
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .bind(target_language)
        .fetch_optional(&self.pool)
        .await?
        .map(Job::try_from)
        .transpose()
    }

    async fn mark_processing(&self, id: &str) -> Result<()> {
        let result = retry_on_sqlite_busy("mark_processing", || async {
            Ok(sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'processing', current_stage = ?, updated_at = ?
                WHERE id = ? AND status IN ('pending', 'processing')
                "#,
            )
            .bind(Stage::Initializing.as_str())
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn update_progress(&self, id: &str, progress: u8, stage: Stage) -> Result<()> {
        retry_on_sqlite_busy("update_progress", || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET progress = MAX(progress, ?), current_stage = ?, updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(i64::from(progress.min(100)))
            .bind(stage.as_str())
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn mark_completed(&self, id: &str) -> Result<()> {
        let now = now_ms();
        let result = retry_on_sqlite_busy("mark_completed", || async {
            Ok(sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'completed', progress = 100, current_stage = ?, error = NULL,
                    updated_at = ?, completed_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(Stage::Complete.as_str())
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?)
        })
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Completed).await);
        }
        Ok(())
    }

    async fn mark_retrying(&self, id: &str, error: &str) -> Result<()> {
        retry_on_sqlite_busy("mark_retrying", || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending', error = ?, updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(error)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        retry_on_sqlite_busy("mark_failed", || async {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed', error = ?, updated_at = ?, completed_at = NULL
                WHERE id = ? AND status IN ('pending', 'processing')
                "#,
            )
            .bind(error)
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn reset_for_redub(&self, id: &str) -> Result<Job> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', progress = 0, current_stage = NULL, error = NULL,
                completed_at = NULL, updated_at = ?
            WHERE id = ? AND status IN ('completed', 'failed')
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, JobStatus::Pending).await);
        }
        self.get_job(id).await
    }

    async fn reset_interrupted_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', updated_at = ? WHERE status = 'processing'",
        )
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    async fn repo_with_job() -> (SqlxJobRepository, Job) {
        let repo = SqlxJobRepository::new(test_pool().await);
        let job = Job::new("abc123", "ad.mp4", "http://files/abc123/ad.mp4", "es", false);
        repo.create_job(&job).await.unwrap();
        (repo, job)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (repo, job) = repo_with_job().await;
        let loaded = repo.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(loaded.target_language, "es");

        let missing = repo.get_job("nope").await.unwrap_err();
        assert!(matches!(missing, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (repo, job) = repo_with_job().await;
        repo.mark_processing(&job.id).await.unwrap();
        repo.update_progress(&job.id, 40, Stage::Transcribe)
            .await
            .unwrap();
        repo.update_progress(&job.id, 10, Stage::ExtractAudio)
            .await
            .unwrap();
        let loaded = repo.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.progress, 40);
        assert_eq!(loaded.current_stage.as_deref(), Some("extract_audio"));
    }

    #[tokio::test]
    async fn test_completed_sets_completed_at() {
        let (repo, job) = repo_with_job().await;
        // Cannot complete a job that never started.
        assert!(matches!(
            repo.mark_completed(&job.id).await,
            Err(Error::InvalidStateTransition { .. })
        ));

        repo.mark_processing(&job.id).await.unwrap();
        repo.mark_completed(&job.id).await.unwrap();
        let loaded = repo.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Completed);
        assert_eq!(loaded.progress, 100);
        assert!(loaded.completed_at.is_some());

        let found = repo.find_completed("abc123", "es").await.unwrap();
        assert_eq!(found.map(|j| j.id), Some(job.id.clone()));
        assert!(repo.find_completed("abc123", "fr").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_has_error_and_no_completed_at() {
        let (repo, job) = repo_with_job().await;
        repo.mark_processing(&job.id).await.unwrap();
        repo.mark_retrying(&job.id, "Stage translate failed: boom")
            .await
            .unwrap();
        let loaded = repo.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert!(loaded.error.is_some());

        repo.mark_failed(&job.id, "Stage translate failed: boom")
            .await
            .unwrap();
        let loaded = repo.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("Stage translate failed: boom"));
        assert!(loaded.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_redub_only_from_terminal() {
        let (repo, job) = repo_with_job().await;
        assert!(matches!(
            repo.reset_for_redub(&job.id).await,
            Err(Error::InvalidStateTransition { .. })
        ));

        repo.mark_processing(&job.id).await.unwrap();
        repo.mark_completed(&job.id).await.unwrap();
        let reset = repo.reset_for_redub(&job.id).await.unwrap();
        assert_eq!(reset.status, JobStatus::Pending);
        assert_eq!(reset.progress, 0);
        assert!(reset.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_reset_interrupted_jobs() {
        let (repo, job) = repo_with_job().await;
        repo.mark_processing(&job.id).await.unwrap();
        assert_eq!(repo.reset_interrupted_jobs().await.unwrap(), 1);
        let loaded = repo.get_job(&job.id).await.unwrap();
        assert_eq!(loaded.status, JobStatus::Pending);
        assert_eq!(
            repo.find_in_flight("abc123", "es").await.unwrap().map(|j| j.id),
            Some(job.id)
        );
    }
}
