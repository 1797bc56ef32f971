//! Artifact repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::ArtifactDbModel;
use crate::domain::{Artifact, ArtifactType};

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn insert(&self, artifact: &Artifact) -> Result<()>;
    /// Most recent artifact of a type produced under a cache key.
    async fn latest_by_key(
        &self,
        content_hash: &str,
        artifact_type: ArtifactType,
    ) -> Result<Option<Artifact>>;
    async fn list_for_job(&self, job_id: &str) -> Result<Vec<Artifact>>;
}

/// SQLx implementation of ArtifactRepository.
pub struct SqlxArtifactRepository {
    pool: SqlitePool,
}

impl SqlxArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactRepository for SqlxArtifactRepository {
    async fn insert(&self, artifact: &Artifact) -> Result<()> {
        let row = ArtifactDbModel::from_domain(artifact)?;
        sqlx::query(
            r#"
            INSERT INTO artifacts (id, job_id, content_hash, artifact_type, url, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.job_id)
        .bind(&row.content_hash)
        .bind(&row.artifact_type)
        .bind(&row.url)
        .bind(&row.metadata)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_by_key(
        &self,
        content_hash: &str,
        artifact_type: ArtifactType,
    ) -> Result<Option<Artifact>> {
        sqlx::query_as::<_, ArtifactDbModel>(
            r#"
            SELECT * FROM artifacts
            WHERE content_hash = ? AND artifact_type = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(content_hash)
        .bind(artifact_type.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Artifact::try_from)
        .transpose()
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<Artifact>> {
        sqlx::query_as::<_, ArtifactDbModel>(
            "SELECT * FROM artifacts WHERE job_id = ? ORDER BY created_at, rowid",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Artifact::try_from)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::{JobRepository, SqlxJobRepository};
    use crate::database::test_pool;
    use crate::domain::Job;

    #[tokio::test]
    async fn test_latest_by_key_and_cascade() {
        let pool = test_pool().await;
        let jobs = SqlxJobRepository::new(pool.clone());
        let repo = SqlxArtifactRepository::new(pool.clone());
        let job = Job::new("abc123", "ad.mp4", "http://f/ad.mp4", "es", false);
        jobs.create_job(&job).await.unwrap();

        let first = Artifact::new(
            &job.id,
            Some("abc123".into()),
            ArtifactType::ExtractedAudio,
            "http://f/abc123/audio-1.mp3",
        );
        let second = Artifact::new(
            &job.id,
            Some("abc123".into()),
            ArtifactType::ExtractedAudio,
            "http://f/abc123/audio-2.mp3",
        )
        .with_metadata("format", "mp3");
        repo.insert(&first).await.unwrap();
        repo.insert(&second).await.unwrap();

        let latest = repo
            .latest_by_key("abc123", ArtifactType::ExtractedAudio)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.url, second.url);
        assert_eq!(latest.metadata.get("format").map(String::as_str), Some("mp3"));
        assert!(
            repo.latest_by_key("abc123", ArtifactType::FinalVideo)
                .await
                .unwrap()
                .is_none()
        );

        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(&job.id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(repo.list_for_job(&job.id).await.unwrap().is_empty());
    }
}
