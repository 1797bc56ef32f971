//! Transcript repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::TranscriptDbModel;
use crate::domain::Transcript;

/// Append-only store of transcript versions.
#[async_trait]
pub trait TranscriptRepository: Send + Sync {
    async fn insert(&self, transcript: &Transcript) -> Result<()>;
    /// Most recent version for a source file in a language, across all jobs.
    async fn latest_by_hash(&self, content_hash: &str, language: &str)
    -> Result<Option<Transcript>>;
    /// Most recent version written by one job in a language.
    async fn latest_by_job(&self, job_id: &str, language: &str) -> Result<Option<Transcript>>;
}

/// SQLx implementation of TranscriptRepository.
pub struct SqlxTranscriptRepository {
    pool: SqlitePool,
}

impl SqlxTranscriptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TranscriptRepository for SqlxTranscriptRepository {
    async fn insert(&self, transcript: &Transcript) -> Result<()> {
        let row = TranscriptDbModel::from_domain(transcript)?;
        sqlx::query(
            r#"
            INSERT INTO transcripts (
                id, job_id, content_hash, language, detected_language, speakers, segments, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.job_id)
        .bind(&row.content_hash)
        .bind(&row.language)
        .bind(&row.detected_language)
        .bind(&row.speakers)
        .bind(&row.segments)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_by_hash(
        &self,
        content_hash: &str,
        language: &str,
    ) -> Result<Option<Transcript>> {
        sqlx::query_as::<_, TranscriptDbModel>(
            r#"
            SELECT * FROM transcripts
            WHERE content_hash = ? AND language = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?
        .map(Transcript::try_from)
        .transpose()
    }

    async fn latest_by_job(&self, job_id: &str, language: &str) -> Result<Option<Transcript>> {
        sqlx::query_as::<_, TranscriptDbModel>(
            r#"
            SELECT * FROM transcripts
            WHERE job_id = ? AND language = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?
        .map(Transcript::try_from)
        .transpose()
    }
}
