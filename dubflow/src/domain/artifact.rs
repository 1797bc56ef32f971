//! Durable pipeline byproducts stored in blob storage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of artifact a stage produced.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    ExtractedAudio,
    DubbedAudio,
    FinalVideo,
    LipsyncedVideo,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractedAudio => "extracted_audio",
            Self::DubbedAudio => "dubbed_audio",
            Self::FinalVideo => "final_video",
            Self::LipsyncedVideo => "lipsynced_video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extracted_audio" => Some(Self::ExtractedAudio),
            "dubbed_audio" => Some(Self::DubbedAudio),
            "final_video" => Some(Self::FinalVideo),
            "lipsynced_video" => Some(Self::LipsyncedVideo),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::FinalVideo | Self::LipsyncedVideo)
    }
}

/// Immutable pointer to a stored byproduct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub job_id: String,
    /// Cache key the artifact was produced under, if it is reusable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub artifact_type: ArtifactType,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        job_id: impl Into<String>,
        content_hash: Option<String>,
        artifact_type: ArtifactType,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            content_hash,
            artifact_type,
            url: url.into(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The video a client should download: lip-synced when available, otherwise the final mix.
pub fn ready_video(artifacts: &[Artifact]) -> Option<&Artifact> {
    let latest = |ty: ArtifactType| {
        artifacts
            .iter()
            .filter(|a| a.artifact_type == ty)
            .max_by_key(|a| a.created_at)
    };
    latest(ArtifactType::LipsyncedVideo).or_else(|| latest(ArtifactType::FinalVideo))
}
