//! Voice mapping repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::VoiceMappingDbModel;
use crate::database::time::now_ms;
use crate::domain::VoiceMapping;

#[async_trait]
pub trait VoiceMappingRepository: Send + Sync {
    /// Insert or overwrite the mapping for `(job_id, speaker_id)`; returns the stored row.
    async fn upsert(&self, mapping: &VoiceMapping) -> Result<VoiceMapping>;
    async fn list_for_job(&self, job_id: &str) -> Result<Vec<VoiceMapping>>;
}

/// SQLx implementation of VoiceMappingRepository.
pub struct SqlxVoiceMappingRepository {
    pool: SqlitePool,
}

impl SqlxVoiceMappingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoiceMappingRepository for SqlxVoiceMappingRepository {
    async fn upsert(&self, mapping: &VoiceMapping) -> Result<VoiceMapping> {
        let row = VoiceMappingDbModel::from(mapping);
        let now = now_ms();
        let stored = sqlx::query_as::<_, VoiceMappingDbModel>(
            r#"
            INSERT INTO voice_mappings (
                job_id, speaker_id, speaker_name, voice_id, voice_name, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (job_id, speaker_id) DO UPDATE SET
                speaker_name = excluded.speaker_name,
                voice_id = excluded.voice_id,
                voice_name = excluded.voice_name,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(&row.job_id)
        .bind(&row.speaker_id)
        .bind(&row.speaker_name)
        .bind(&row.voice_id)
        .bind(&row.voice_name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored.into())
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<VoiceMapping>> {
        let rows = sqlx::query_as::<_, VoiceMappingDbModel>(
            "SELECT * FROM voice_mappings WHERE job_id = ? ORDER BY created_at, speaker_id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(VoiceMapping::from).collect())
    }
}
