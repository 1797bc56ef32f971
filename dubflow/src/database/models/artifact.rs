//! Artifact database model.

use std::collections::BTreeMap;

use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{Artifact, ArtifactType};
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

/// Row of the `artifacts` table.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactDbModel {
    pub id: String,
    pub job_id: String,
    pub content_hash: Option<String>,
    pub artifact_type: String,
    pub url: String,
    /// JSON object of string metadata
    pub metadata: Option<String>,
    pub created_at: i64,
}

impl ArtifactDbModel {
    pub fn from_domain(artifact: &Artifact) -> Result<Self> {
        let metadata = if artifact.metadata.is_empty() {
            None
        } else {
            Some(json::to_column(&artifact.metadata)?)
        };
        Ok(Self {
            id: artifact.id.clone(),
            job_id: artifact.job_id.clone(),
            content_hash: artifact.content_hash.clone(),
            artifact_type: artifact.artifact_type.as_str().to_string(),
            url: artifact.url.clone(),
            metadata,
            created_at: datetime_to_ms(artifact.created_at),
        })
    }
}

impl TryFrom<ArtifactDbModel> for Artifact {
    type Error = Error;

    fn try_from(row: ArtifactDbModel) -> Result<Self> {
        let artifact_type = ArtifactType::parse(&row.artifact_type).ok_or_else(|| {
            Error::Database(format!(
                "artifact {} has unknown type '{}'",
                row.id, row.artifact_type
            ))
        })?;
        let metadata: BTreeMap<String, String> = json::parse_optional_strict(
            row.metadata.as_deref(),
            JsonContext::ArtifactField {
                artifact_id: &row.id,
                field: "metadata",
            },
        )?
        .unwrap_or_default();
        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            content_hash: row.content_hash,
            artifact_type,
            url: row.url,
            metadata,
            created_at: ms_to_datetime(row.created_at),
        })
    }
}
