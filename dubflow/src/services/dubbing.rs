//! Request-facing operations on dubbing jobs.
//!
//! Everything here runs synchronously on the caller's request: validation,
//! lookups and enqueueing. The heavy lifting happens later on the worker pool.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{ContentCache, compute_content_hash};
use crate::database::Repositories;
use crate::domain::{
    Artifact, Job, JobStatus, Segment, Transcript, VoiceMapping, normalize_language,
    normalize_transcript_language, ready_video,
};
use crate::domain::transcript::sort_chronologically;
use crate::pipeline::{DubbingRequest, JobQueue, QueueSnapshot};
use crate::storage::BlobStorage;
use crate::utils::fs::sanitize_filename;
use crate::{Error, Result};

/// Submission-side settings.
#[derive(Debug, Clone)]
pub struct DubbingServiceConfig {
    pub max_upload_bytes: usize,
    /// Return a pending or processing job for the same content and language
    /// instead of creating a second one.
    pub dedupe_in_flight: bool,
}

impl Default for DubbingServiceConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
            dedupe_in_flight: false,
        }
    }
}

/// A video upload to dub.
#[derive(Debug, Clone)]
pub struct Submission {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub target_language: String,
    pub lipsync: bool,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub job_id: String,
    /// The id belongs to an already completed job for the same content and language.
    pub cached: bool,
}

/// Everything a client polls for.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueSnapshot>,
    pub artifacts: Vec<Artifact>,
    /// Set once the job completed: the lip-synced video if there is one, else the final video.
    pub ready_video_url: Option<String>,
}

/// Fields accepted when binding a speaker to a voice.
#[derive(Debug, Clone, Default)]
pub struct VoiceMappingInput {
    pub voice_id: String,
    pub speaker_name: Option<String>,
    pub voice_name: Option<String>,
}

#[derive(Clone)]
pub struct DubbingService {
    config: DubbingServiceConfig,
    repos: Repositories,
    cache: ContentCache,
    queue: Arc<JobQueue>,
    storage: Arc<dyn BlobStorage>,
}

impl DubbingService {
    pub fn new(
        config: DubbingServiceConfig,
        repos: Repositories,
        queue: Arc<JobQueue>,
        storage: Arc<dyn BlobStorage>,
    ) -> Self {
        Self {
            cache: ContentCache::new(
                repos.artifacts.clone(),
                repos.transcripts.clone(),
                repos.jobs.clone(),
            ),
            config,
            repos,
            queue,
            storage,
        }
    }

    pub fn config(&self) -> &DubbingServiceConfig {
        &self.config
    }

    /// Accept an upload and queue it, or point at the job that already dubbed it.
    pub async fn submit(&self, submission: Submission) -> Result<SubmitOutcome> {
        let size = submission.bytes.len();
        if size > self.config.max_upload_bytes {
            return Err(Error::PayloadTooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }
        if size == 0 {
            return Err(Error::validation("uploaded file is empty"));
        }
        let language = normalize_language(&submission.target_language)?;
        let hash = compute_content_hash(&submission.bytes);

        if let Some(job) = self.cache.lookup_job(&hash, &language).await? {
            info!(job_id = %job.id, content_hash = %hash, language = %language, "Submission served from cache");
            return Ok(SubmitOutcome {
                job_id: job.id,
                cached: true,
            });
        }
        if self.config.dedupe_in_flight
            && let Some(job) = self.cache.lookup_in_flight_job(&hash, &language).await?
        {
            debug!(job_id = %job.id, "Submission joins in-flight job");
            return Ok(SubmitOutcome {
                job_id: job.id,
                cached: false,
            });
        }

        let filename = sanitize_filename(&submission.filename);
        let file_url = self
            .storage
            .put(&format!("{hash}/{filename}"), &submission.bytes)
            .await?;

        let job = Job::new(
            hash.clone(),
            submission.filename.clone(),
            file_url,
            language.clone(),
            submission.lipsync,
        );
        self.repos.jobs.create_job(&job).await?;
        self.queue.enqueue(&request_for(&job)).await?;

        info!(
            job_id = %job.id,
            content_hash = %hash,
            language = %language,
            lipsync = job.lipsync,
            size,
            "Job submitted"
        );
        Ok(SubmitOutcome {
            job_id: job.id,
            cached: false,
        })
    }

    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusView> {
        let job = self.repos.jobs.get_job(job_id).await?;
        let queue = self.queue.get_status(job_id).await?;
        let artifacts = self.repos.artifacts.list_for_job(job_id).await?;
        let ready_video_url = (job.status == JobStatus::Completed)
            .then(|| ready_video(&artifacts).map(|a| a.url.clone()))
            .flatten();

        Ok(JobStatusView {
            job,
            queue,
            artifacts,
            ready_video_url,
        })
    }

    /// Latest transcript of the job in `language` (`original` for the source).
    ///
    /// A job served from cache has no transcripts of its own; it sees the ones
    /// stored for the same content.
    pub async fn get_transcript(&self, job_id: &str, language: &str) -> Result<Transcript> {
        let language = normalize_transcript_language(language)?;
        let job = self.repos.jobs.get_job(job_id).await?;

        if let Some(transcript) = self.repos.transcripts.latest_by_job(job_id, &language).await? {
            return Ok(transcript);
        }
        self.cache
            .lookup_transcript(&job.content_hash, &language)
            .await?
            .ok_or_else(|| Error::not_found("Transcript", format!("{job_id}/{language}")))
    }

    /// Store an edited transcript as a new version.
    pub async fn save_transcript(
        &self,
        job_id: &str,
        language: &str,
        mut segments: Vec<Segment>,
    ) -> Result<Transcript> {
        let language = normalize_transcript_language(language)?;
        let job = self.repos.jobs.get_job(job_id).await?;
        if segments.is_empty() {
            return Err(Error::validation("a transcript needs at least one segment"));
        }
        sort_chronologically(&mut segments);

        let detected = self
            .cache
            .lookup_transcript(&job.content_hash, &language)
            .await?
            .and_then(|previous| previous.detected_language);
        let transcript = Transcript::new(job.id, job.content_hash, language, segments)?
            .with_detected_language(detected);
        self.repos.transcripts.insert(&transcript).await?;

        info!(
            job_id = %job_id,
            transcript_id = %transcript.id,
            language = %transcript.language,
            segments = transcript.segments.len(),
            "Transcript saved"
        );
        Ok(transcript)
    }

    pub async fn list_voice_mappings(&self, job_id: &str) -> Result<Vec<VoiceMapping>> {
        self.repos.jobs.get_job(job_id).await?;
        self.repos.voices.list_for_job(job_id).await
    }

    pub async fn upsert_voice_mapping(
        &self,
        job_id: &str,
        speaker_id: &str,
        input: VoiceMappingInput,
    ) -> Result<VoiceMapping> {
        let speaker_id = speaker_id.trim();
        let voice_id = input.voice_id.trim();
        if speaker_id.is_empty() {
            return Err(Error::validation("speaker_id must not be empty"));
        }
        if voice_id.is_empty() {
            return Err(Error::validation("voice_id must not be empty"));
        }
        self.repos.jobs.get_job(job_id).await?;

        let mapping = VoiceMapping::new(job_id, speaker_id, voice_id)
            .with_names(non_blank(input.speaker_name), non_blank(input.voice_name));
        let stored = self.repos.voices.upsert(&mapping).await?;
        debug!(job_id = %job_id, speaker_id = %speaker_id, voice_id = %voice_id, "Voice mapping saved");
        Ok(stored)
    }

    /// Run a finished job again, picking up edited transcripts and voices.
    pub async fn redub(&self, job_id: &str) -> Result<Job> {
        let job = self.repos.jobs.reset_for_redub(job_id).await?;
        self.queue.enqueue(&request_for(&job)).await?;
        info!(job_id = %job_id, "Job re-queued for dubbing");
        Ok(job)
    }
}

fn request_for(job: &Job) -> DubbingRequest {
    DubbingRequest {
        job_id: job.id.clone(),
        content_hash: job.content_hash.clone(),
        target_language: job.target_language.clone(),
        lipsync: job.lipsync,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
