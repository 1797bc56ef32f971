//! Read-only lookups of reusable results.

use std::sync::Arc;

use crate::Result;
use crate::database::repositories::{ArtifactRepository, JobRepository, TranscriptRepository};
use crate::domain::{Artifact, ArtifactType, Job, Transcript};

/// Lookups that let a stage skip work already done for identical input.
///
/// None of these methods write; a hit returns exactly the entity a fresh
/// computation would have stored.
#[derive(Clone)]
pub struct ContentCache {
    artifacts: Arc<dyn ArtifactRepository>,
    transcripts: Arc<dyn TranscriptRepository>,
    jobs: Arc<dyn JobRepository>,
}

impl ContentCache {
    pub fn new(
        artifacts: Arc<dyn ArtifactRepository>,
        transcripts: Arc<dyn TranscriptRepository>,
        jobs: Arc<dyn JobRepository>,
    ) -> Self {
        Self {
            artifacts,
            transcripts,
            jobs,
        }
    }

    /// Most recent artifact of `artifact_type` stored under `key`.
    pub async fn lookup_artifact(
        &self,
        key: &str,
        artifact_type: ArtifactType,
    ) -> Result<Option<Artifact>> {
        self.artifacts.latest_by_key(key, artifact_type).await
    }

    /// Most recent transcript of the source file in `language`.
    pub async fn lookup_transcript(
        &self,
        content_hash: &str,
        language: &str,
    ) -> Result<Option<Transcript>> {
        self.transcripts.latest_by_hash(content_hash, language).await
    }

    /// A completed job that already dubbed this file into `target_language`.
    pub async fn lookup_job(
        &self,
        content_hash: &str,
        target_language: &str,
    ) -> Result<Option<Job>> {
        self.jobs.find_completed(content_hash, target_language).await
    }

    /// A job for the same pair that is still pending or processing.
    pub async fn lookup_in_flight_job(
        &self,
        content_hash: &str,
        target_language: &str,
    ) -> Result<Option<Job>> {
        self.jobs.find_in_flight(content_hash, target_language).await
    }
}
