//! Voice mapping database model.

use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::VoiceMapping;

/// Row of the `voice_mappings` table, unique on `(job_id, speaker_id)`.
#[derive(Debug, Clone, FromRow)]
pub struct VoiceMappingDbModel {
    pub job_id: String,
    pub speaker_id: String,
    pub speaker_name: Option<String>,
    pub voice_id: String,
    pub voice_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&VoiceMapping> for VoiceMappingDbModel {
    fn from(mapping: &VoiceMapping) -> Self {
        Self {
            job_id: mapping.job_id.clone(),
            speaker_id: mapping.speaker_id.clone(),
            speaker_name: mapping.speaker_name.clone(),
            voice_id: mapping.voice_id.clone(),
            voice_name: mapping.voice_name.clone(),
            created_at: datetime_to_ms(mapping.created_at),
            updated_at: datetime_to_ms(mapping.updated_at),
        }
    }
}

impl From<VoiceMappingDbModel> for VoiceMapping {
    fn from(row: VoiceMappingDbModel) -> Self {
        Self {
            job_id: row.job_id,
            speaker_id: row.speaker_id,
            speaker_name: row.speaker_name,
            voice_id: row.voice_id,
            voice_name: row.voice_name,
            created_at: ms_to_datetime(row.created_at),
            updated_at: ms_to_datetime(row.updated_at),
        }
    }
}
