//! Durable job queue repository.
//!
//! One row per job id. Claiming is a single `UPDATE ... RETURNING`, so two
//! workers polling at the same instant can never both receive a row.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::QueueEntryDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Admit a job. Returns `false` when the job already has a live (non-terminal) entry.
    ///
    /// A terminal entry is reset to `waiting` with a fresh attempt budget.
    async fn enqueue(&self, job_id: &str, payload: &str, max_attempts: u32) -> Result<bool>;
    /// Claim the next runnable entry, marking it `active` and counting the attempt.
    async fn claim_next(&self) -> Result<Option<QueueEntryDbModel>>;
    async fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        stage: &str,
        message: &str,
    ) -> Result<()>;
    async fn complete(&self, job_id: &str) -> Result<()>;
    /// Park an active entry as `delayed` until `run_at_ms`.
    async fn schedule_retry(&self, job_id: &str, run_at_ms: i64, error: &str) -> Result<()>;
    async fn fail(&self, job_id: &str, error: &str) -> Result<()>;
    async fn get(&self, job_id: &str) -> Result<Option<QueueEntryDbModel>>;
    /// Fail entries left `active` that already used their last attempt.
    /// Returns the affected job ids.
    async fn fail_exhausted_active(&self, error: &str) -> Result<Vec<String>>;
    /// Return entries left `active` by a crashed process to `waiting`.
    async fn recover_active(&self) -> Result<u64>;
    /// Delete up to `limit` terminal entries that finished before `cutoff_ms`.
    async fn purge_finished(&self, cutoff_ms: i64, limit: u32) -> Result<u64>;
    async fn count_by_state(&self) -> Result<Vec<(String, i64)>>;
}

/// SQLx implementation of QueueRepository.
pub struct SqlxQueueRepository {
    pool: SqlitePool,
}

impl SqlxQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqlxQueueRepository {
    async fn enqueue(&self, job_id: &str, payload: &str, max_attempts: u32) -> Result<bool> {
        let now = now_ms();
        let result = retry_on_sqlite_busy("enqueue", || async {
            Ok(sqlx::query(
                r#"
                INSERT INTO job_queue (
                    job_id, payload, state, attempts, max_attempts, run_at, progress,
                    created_at, updated_at
                ) VALUES (?, ?, 'waiting', 0, ?, ?, 0, ?, ?)
                ON CONFLICT (job_id) DO UPDATE SET
                    payload = excluded.payload,
                    state = 'waiting',
                    attempts = 0,
                    max_attempts = excluded.max_attempts,
                    run_at = excluded.run_at,
                    progress = 0,
                    stage = NULL,
                    message = NULL,
                    last_error = NULL,
                    updated_at = excluded.updated_at,
                    finished_at = NULL
                WHERE job_queue.state IN ('completed', 'failed')
                "#,
            )
            .bind(job_id)
            .bind(payload)
            .bind(i64::from(max_attempts.max(1)))
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(&self) -> Result<Option<QueueEntryDbModel>> {
        retry_on_sqlite_busy("claim_next", || async {
            let now = now_ms();
            let entry = sqlx::query_as::<_, QueueEntryDbModel>(
                r#"
                UPDATE job_queue
                SET state = 'active', attempts = attempts + 1, updated_at = ?
                WHERE job_id = (
                    SELECT job_id FROM job_queue
                    WHERE state IN ('waiting', 'delayed') AND run_at <= ?
                    ORDER BY run_at ASC, created_at ASC, rowid ASC
                    LIMIT 1
                )
                AND state IN ('waiting', 'delayed')
                RETURNING *
                "#,
            )
            .bind(now)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
            Ok(entry)
        })
        .await
    }

    async fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        stage: &str,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET progress = MAX(progress, ?), stage = ?, message = ?, updated_at = ?
            WHERE job_id = ? AND state = 'active'
            "#,
        )
        .bind(i64::from(progress.min(100)))
        .bind(stage)
        .bind(message)
        .bind(now_ms())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let now = now_ms();
        retry_on_sqlite_busy("queue_complete", || async {
            sqlx::query(
                r#"
                UPDATE job_queue
                SET state = 'completed', progress = 100, stage = 'complete', message = 'Completed',
                    last_error = NULL, updated_at = ?, finished_at = ?
                WHERE job_id = ?
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn schedule_retry(&self, job_id: &str, run_at_ms: i64, error: &str) -> Result<()> {
        retry_on_sqlite_busy("queue_schedule_retry", || async {
            sqlx::query(
                r#"
                UPDATE job_queue
                SET state = 'delayed', run_at = ?, last_error = ?, message = 'Waiting to retry',
                    updated_at = ?
                WHERE job_id = ?
                "#,
            )
            .bind(run_at_ms)
            .bind(error)
            .bind(now_ms())
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<()> {
        let now = now_ms();
        retry_on_sqlite_busy("queue_fail", || async {
            sqlx::query(
                r#"
                UPDATE job_queue
                SET state = 'failed', last_error = ?, message = 'Failed', updated_at = ?,
                    finished_at = ?
                WHERE job_id = ?
                "#,
            )
            .bind(error)
            .bind(now)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, job_id: &str) -> Result<Option<QueueEntryDbModel>> {
        let entry =
            sqlx::query_as::<_, QueueEntryDbModel>("SELECT * FROM job_queue WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(entry)
    }

    async fn fail_exhausted_active(&self, error: &str) -> Result<Vec<String>> {
        let now = now_ms();
        let job_ids = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE job_queue
            SET state = 'failed', last_error = ?, message = 'Failed', updated_at = ?,
                finished_at = ?
            WHERE state = 'active' AND attempts >= max_attempts
            RETURNING job_id
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(job_ids)
    }

    async fn recover_active(&self) -> Result<u64> {
        // The interrupted attempt stays counted.
        let now = now_ms();
        let result = sqlx::query(
            r#"
            UPDATE job_queue
            SET state = 'waiting', run_at = ?, updated_at = ?
            WHERE state = 'active'
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_finished(&self, cutoff_ms: i64, limit: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_queue
            WHERE job_id IN (
                SELECT job_id FROM job_queue
                WHERE state IN ('completed', 'failed') AND finished_at < ?
                LIMIT ?
            )
            "#,
        )
        .bind(cutoff_ms)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_by_state(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM job_queue GROUP BY state ORDER BY state")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}
