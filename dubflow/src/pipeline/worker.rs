//! The dubbing pipeline: one job, start to finish.
//!
//! Stages run strictly in order:
//!
//! ```text
//! initializing -> extract_audio -> transcribe -> translate -> generate_speech
//!              -> mix_audio -> upload -> [lipsync] -> complete
//! ```
//!
//! Each stage first looks for a cached result keyed by the source content
//! hash and only calls a provider on a miss, so a retried job resumes almost
//! where the failed attempt stopped. Every error leaving a stage is wrapped
//! with the stage name. Scratch files live in a per-run temporary directory
//! that is removed when the run ends, however it ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::job_queue::DubbingRequest;
use super::poll::{PollPolicy, poll_until};
use super::progress::{JobProgressSnapshot, ProgressReporter};
use super::speech::{SynthesizedClip, plan_track};
use crate::cache::{CacheKey, ContentCache, ExpiringCache};
use crate::database::Repositories;
use crate::domain::{
    Artifact, ArtifactType, Job, ORIGINAL_LANGUAGE, Stage, Transcript, VoiceAssignment,
    transcript::sort_chronologically,
};
use crate::providers::{LipSyncStatus, Providers};
use crate::storage::BlobStorage;
use crate::utils::fs::{ensure_dir_all_with_op, sanitize_filename, write_file};
use crate::{Error, Result};

/// Characters of a derived cache key used to keep stored file names apart.
const KEY_PREFIX_LEN: usize = 12;

/// Settings of the pipeline itself (provider settings live with the providers).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Voice used for speakers without a voice mapping.
    pub default_voice_id: Option<String>,
    /// Polling of the lip-sync provider.
    pub lipsync_poll: PollPolicy,
    /// How long a submitted lip-sync generation is remembered, so a retried
    /// job resumes polling instead of submitting again.
    pub lipsync_handle_ttl: Duration,
    /// Parent directory for per-run scratch space; the system temp dir when `None`.
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_voice_id: None,
            lipsync_poll: PollPolicy::default(),
            lipsync_handle_ttl: Duration::from_secs(24 * 60 * 60),
            work_dir: None,
        }
    }
}

/// State shared by the stages of one run.
struct RunContext<'a> {
    job: Job,
    dir: &'a Path,
    reporter: &'a ProgressReporter,
}

impl RunContext<'_> {
    fn hash(&self) -> &str {
        &self.job.content_hash
    }

    fn language(&self) -> &str {
        &self.job.target_language
    }
}

/// A cached or freshly produced file: the artifact plus its local copy, if any.
struct Produced {
    artifact: Artifact,
    key: CacheKey,
    local: Option<PathBuf>,
}

/// Output of the mix stage.
enum Mixed {
    /// An identical mix was already stored.
    Cached(Produced),
    /// A new mix waiting to be uploaded.
    Fresh { key: CacheKey, path: PathBuf },
}

enum LipSyncPoll {
    Done(String),
    Rejected(String),
}

/// Runs the stage state machine for one job at a time.
pub struct DubbingPipeline {
    repos: Repositories,
    cache: ContentCache,
    memo: ExpiringCache,
    providers: Providers,
    storage: Arc<dyn BlobStorage>,
    config: PipelineConfig,
}

impl DubbingPipeline {
    pub fn new(
        repos: Repositories,
        providers: Providers,
        storage: Arc<dyn BlobStorage>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cache: ContentCache::new(
                repos.artifacts.clone(),
                repos.transcripts.clone(),
                repos.jobs.clone(),
            ),
            memo: ExpiringCache::new(repos.cache.clone()),
            repos,
            providers,
            storage,
            config,
        }
    }

    /// Run every stage for the job named by `request`.
    ///
    /// On success the job is `completed`. On error the job is left `processing`
    /// and the caller decides between retry and failure.
    pub async fn run(&self, request: &DubbingRequest, reporter: &ProgressReporter) -> Result<()> {
        let job_id = request.job_id.as_str();

        let job = async {
            self.repos.jobs.mark_processing(job_id).await?;
            self.repos.jobs.get_job(job_id).await
        }
        .await
        .map_err(|e| e.in_stage(Stage::Initializing.as_str()))?;
        reporter.report(
            JobProgressSnapshot::new(Stage::Initializing, job.progress).with_message("Starting"),
        );
        info!(job_id = %job_id, language = %job.target_language, lipsync = job.lipsync, "Dubbing job started");

        // Removed on drop, including when this future is cancelled by the job timeout.
        let workspace = self
            .create_workspace(job_id)
            .map_err(|e| e.in_stage(Stage::Initializing.as_str()))?;
        let ctx = RunContext {
            job,
            dir: workspace.path(),
            reporter,
        };

        let (video, audio) = self
            .stage(&ctx, Stage::ExtractAudio, self.extract_audio(&ctx))
            .await?;
        let original = self
            .stage(&ctx, Stage::Transcribe, self.transcribe(&ctx, &audio))
            .await?;
        let translated = self
            .stage(&ctx, Stage::Translate, self.translate(&ctx, &original))
            .await?;
        let dubbed = self
            .stage(
                &ctx,
                Stage::GenerateSpeech,
                self.generate_speech(&ctx, &translated),
            )
            .await?;
        let mixed = self
            .stage(&ctx, Stage::MixAudio, self.mix_audio(&ctx, &video, &dubbed))
            .await?;
        let final_video = self
            .stage(&ctx, Stage::Upload, self.upload(&ctx, mixed))
            .await?;
        if ctx.job.lipsync {
            self.stage(&ctx, Stage::Lipsync, self.lipsync(&ctx, &final_video, &dubbed))
                .await?;
        }

        self.repos
            .jobs
            .mark_completed(job_id)
            .await
            .map_err(|e| e.in_stage(Stage::Complete.as_str()))?;
        reporter.report(JobProgressSnapshot::new(Stage::Complete, 100).with_message("Completed"));
        info!(job_id = %job_id, url = %final_video.artifact.url, "Dubbing job completed");
        Ok(())
    }

    fn create_workspace(&self, job_id: &str) -> Result<TempDir> {
        let prefix = format!("dubflow-{job_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        match &self.config.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| Error::io_path("creating directory", dir, e))?;
                builder
                    .tempdir_in(dir)
                    .map_err(|e| Error::io_path("creating directory", dir, e))
            }
            None => builder.tempdir().map_err(Error::from),
        }
    }

    /// Enter `stage`, run `work`, then record the stage checkpoint.
    async fn stage<T>(
        &self,
        ctx: &RunContext<'_>,
        stage: Stage,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        debug!(job_id = %ctx.job.id, stage = %stage, "Stage started");
        let result = async {
            self.advance(ctx, stage, stage.start_percent(), None).await?;
            let value = work.await?;
            self.advance(ctx, stage, stage.checkpoint(), Some("Done"))
                .await?;
            Ok(value)
        }
        .await;

        result.map_err(|e: Error| {
            warn!(job_id = %ctx.job.id, stage = %stage, error = %e, "Stage failed");
            e.in_stage(stage.as_str())
        })
    }

    /// Persist progress on the job row and publish it to the queue.
    async fn advance(
        &self,
        ctx: &RunContext<'_>,
        stage: Stage,
        percent: u8,
        message: Option<&str>,
    ) -> Result<()> {
        self.repos
            .jobs
            .update_progress(&ctx.job.id, percent, stage)
            .await?;
        let mut snapshot = JobProgressSnapshot::new(stage, percent);
        if let Some(message) = message {
            snapshot = snapshot.with_message(message);
        }
        ctx.reporter.report(snapshot);
        Ok(())
    }

    /// Record a cached artifact made by another job under this job as well, so
    /// the job's artifact list is complete.
    async fn adopt(&self, ctx: &RunContext<'_>, artifact: Artifact) -> Result<Artifact> {
        if artifact.job_id == ctx.job.id {
            return Ok(artifact);
        }
        let mut adopted = Artifact::new(
            ctx.job.id.clone(),
            artifact.content_hash.clone(),
            artifact.artifact_type,
            artifact.url.clone(),
        )
        .with_metadata("reused_from", artifact.id.clone());
        adopted.metadata.extend(artifact.metadata);
        self.repos.artifacts.insert(&adopted).await?;
        Ok(adopted)
    }

    async fn record(
        &self,
        ctx: &RunContext<'_>,
        key: &CacheKey,
        artifact_type: ArtifactType,
        url: String,
        metadata: &[(&str, &str)],
    ) -> Result<Artifact> {
        let mut artifact = Artifact::new(
            ctx.job.id.clone(),
            Some(key.as_str().to_string()),
            artifact_type,
            url,
        );
        for (k, v) in metadata {
            artifact = artifact.with_metadata(*k, *v);
        }
        self.repos.artifacts.insert(&artifact).await?;
        Ok(artifact)
    }

    /// Storage name for a generated file: the source hash, the short cache key,
    /// then the file name.
    fn output_name(ctx: &RunContext<'_>, key: &CacheKey, file_name: &str) -> String {
        let short: String = key.as_str().chars().take(KEY_PREFIX_LEN).collect();
        format!("{}/{}/{}", ctx.hash(), short, file_name)
    }

    async fn extract_audio(&self, ctx: &RunContext<'_>) -> Result<(PathBuf, PathBuf)> {
        let source_name = sanitize_filename(&ctx.job.original_filename);
        let video = ctx.dir.join(format!("source-{source_name}"));
        self.storage.download(&ctx.job.file_url, &video).await?;

        let audio = ctx.dir.join("audio.mp3");
        let key = CacheKey::source(ctx.hash());
        if let Some(cached) = self
            .cache
            .lookup_artifact(key.as_str(), ArtifactType::ExtractedAudio)
            .await?
        {
            debug!(job_id = %ctx.job.id, "Reusing extracted audio");
            self.storage.download(&cached.url, &audio).await?;
            self.adopt(ctx, cached).await?;
            return Ok((video, audio));
        }

        self.providers.media.extract_audio(&video, &audio).await?;
        let url = self
            .storage
            .put_file(&format!("{}/audio.mp3", ctx.hash()), &audio)
            .await?;
        self.record(ctx, &key, ArtifactType::ExtractedAudio, url, &[])
            .await?;
        Ok((video, audio))
    }

    async fn transcribe(&self, ctx: &RunContext<'_>, audio: &Path) -> Result<Transcript> {
        if let Some(cached) = self
            .cache
            .lookup_transcript(ctx.hash(), ORIGINAL_LANGUAGE)
            .await?
        {
            debug!(job_id = %ctx.job.id, transcript_id = %cached.id, "Reusing transcript");
            return Ok(cached);
        }

        let raw = self.providers.transcriber.transcribe(audio).await?;
        let mut segments = raw.segments;
        if segments.is_empty() {
            return Err(Error::validation("no speech was detected in the source audio"));
        }
        sort_chronologically(&mut segments);

        let detected = raw
            .language
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty());
        // Malformed segments are a provider error, so the attempt is retried.
        let transcript = Transcript::new(
            ctx.job.id.clone(),
            ctx.hash(),
            ORIGINAL_LANGUAGE,
            segments,
        )
        .map_err(|e| match e {
            Error::Validation(message) => Error::provider("transcriber", message),
            other => other,
        })?
        .with_detected_language(detected);
        self.repos.transcripts.insert(&transcript).await?;
        info!(
            job_id = %ctx.job.id,
            segments = transcript.segments.len(),
            speakers = transcript.speakers.len(),
            "Transcript stored"
        );
        Ok(transcript)
    }

    async fn translate(&self, ctx: &RunContext<'_>, original: &Transcript) -> Result<Transcript> {
        // A translation older than the source transcript predates an edit of it.
        if let Some(cached) = self
            .cache
            .lookup_transcript(ctx.hash(), ctx.language())
            .await?
            && cached.created_at >= original.created_at
        {
            debug!(job_id = %ctx.job.id, transcript_id = %cached.id, "Reusing translation");
            return Ok(cached);
        }

        let total = original.segments.len();
        let mut translated = Vec::with_capacity(total);
        for (i, segment) in original.segments.iter().enumerate() {
            let text = self
                .providers
                .translator
                .translate(&segment.text, original.source_language(), ctx.language())
                .await?;
            translated.push(segment.with_text(text));
            self.advance(ctx, Stage::Translate, Stage::Translate.interpolate(i + 1, total), None)
                .await?;
        }

        let transcript = Transcript::new(
            ctx.job.id.clone(),
            ctx.hash(),
            ctx.language(),
            translated,
        )?
        .with_detected_language(original.detected_language.clone());
        self.repos.transcripts.insert(&transcript).await?;
        Ok(transcript)
    }

    async fn generate_speech(
        &self,
        ctx: &RunContext<'_>,
        translated: &Transcript,
    ) -> Result<Produced> {
        let mappings = self.repos.voices.list_for_job(&ctx.job.id).await?;
        let default_voice = self.config.default_voice_id.as_deref().unwrap_or_default();
        let assignment = VoiceAssignment::resolve(&translated.speakers, &mappings, default_voice);
        if let Some(speaker) = translated
            .speakers
            .iter()
            .find(|s| assignment.voice_for(s).is_none_or(str::is_empty))
        {
            return Err(Error::config(format!(
                "no voice mapped for speaker '{speaker}' and no default voice configured"
            )));
        }

        let fingerprint = assignment.fingerprint();
        let key = CacheKey::derive(
            ctx.hash(),
            ArtifactType::DubbedAudio.as_str(),
            &[
                ("language", ctx.language()),
                ("transcript", translated.id.as_str()),
                ("voices", fingerprint.as_str()),
            ],
        );
        if let Some(cached) = self
            .cache
            .lookup_artifact(key.as_str(), ArtifactType::DubbedAudio)
            .await?
        {
            debug!(job_id = %ctx.job.id, "Reusing dubbed audio");
            let artifact = self.adopt(ctx, cached).await?;
            return Ok(Produced {
                artifact,
                key,
                local: None,
            });
        }

        let clip_dir = ctx.dir.join("speech");
        ensure_dir_all_with_op("creating directory", &clip_dir).await?;
        let total = translated.segments.len();
        let mut clips = Vec::with_capacity(total);
        for (index, segment) in translated.segments.iter().enumerate() {
            if !segment.text.trim().is_empty() {
                let voice = assignment.voice_for(&segment.speaker).unwrap_or(default_voice);
                let audio = self.providers.speech.synthesize(&segment.text, voice).await?;
                let path = clip_dir.join(format!("segment_{index:04}.mp3"));
                write_file(&path, &audio).await?;
                clips.push(SynthesizedClip { index, path });
            }
            self.advance(
                ctx,
                Stage::GenerateSpeech,
                Stage::GenerateSpeech.interpolate(index + 1, total),
                None,
            )
            .await?;
        }

        let plan = plan_track(&translated.segments, &clips);
        if plan.is_empty() {
            return Err(Error::validation("translated transcript has no text to speak"));
        }
        let track = ctx.dir.join("dubbed.mp3");
        self.providers.media.assemble_track(&plan, &track).await?;

        let name = Self::output_name(ctx, &key, &format!("dubbed-{}.mp3", ctx.language()));
        let url = self.storage.put_file(&name, &track).await?;
        let artifact = self
            .record(
                ctx,
                &key,
                ArtifactType::DubbedAudio,
                url,
                &[
                    ("language", ctx.language()),
                    ("transcript_id", translated.id.as_str()),
                    ("voices", fingerprint.as_str()),
                ],
            )
            .await?;
        Ok(Produced {
            artifact,
            key,
            local: Some(track),
        })
    }

    /// Produce the final mix, or find it in the cache.
    async fn mix_audio(
        &self,
        ctx: &RunContext<'_>,
        video: &Path,
        dubbed: &Produced,
    ) -> Result<Mixed> {
        let key = CacheKey::derive(
            ctx.hash(),
            ArtifactType::FinalVideo.as_str(),
            &[
                ("language", ctx.language()),
                ("dubbed_audio", dubbed.key.as_str()),
            ],
        );
        if let Some(cached) = self
            .cache
            .lookup_artifact(key.as_str(), ArtifactType::FinalVideo)
            .await?
        {
            debug!(job_id = %ctx.job.id, "Reusing final video");
            let artifact = self.adopt(ctx, cached).await?;
            return Ok(Mixed::Cached(Produced {
                artifact,
                key,
                local: None,
            }));
        }

        let track = match &dubbed.local {
            Some(path) => path.clone(),
            None => {
                let path = ctx.dir.join("dubbed.mp3");
                self.storage.download(&dubbed.artifact.url, &path).await?;
                path
            }
        };
        let output = ctx.dir.join("final.mp4");
        self.providers.media.mux(video, &track, &output).await?;
        Ok(Mixed::Fresh { key, path: output })
    }

    async fn upload(&self, ctx: &RunContext<'_>, mixed: Mixed) -> Result<Produced> {
        let (key, local) = match mixed {
            Mixed::Cached(produced) => return Ok(produced),
            Mixed::Fresh { key, path } => (key, path),
        };
        let file_name = format!("{}-dubbed-{}.mp4", ctx.hash(), ctx.language());
        let name = Self::output_name(ctx, &key, &file_name);
        let url = self.storage.put_file(&name, &local).await?;
        let artifact = self
            .record(
                ctx,
                &key,
                ArtifactType::FinalVideo,
                url,
                &[("language", ctx.language())],
            )
            .await?;
        Ok(Produced {
            artifact,
            key,
            local: Some(local),
        })
    }

    async fn lipsync(
        &self,
        ctx: &RunContext<'_>,
        final_video: &Produced,
        dubbed: &Produced,
    ) -> Result<Artifact> {
        let key = CacheKey::derive(
            ctx.hash(),
            ArtifactType::LipsyncedVideo.as_str(),
            &[("final_video", final_video.key.as_str())],
        );
        if let Some(cached) = self
            .cache
            .lookup_artifact(key.as_str(), ArtifactType::LipsyncedVideo)
            .await?
        {
            debug!(job_id = %ctx.job.id, "Reusing lip-synced video");
            return self.adopt(ctx, cached).await;
        }

        let memo_key = format!("lipsync:{}", final_video.key);
        let handle = match self.memo.get::<String>(&memo_key).await? {
            Some(handle) => {
                info!(job_id = %ctx.job.id, handle = %handle, "Resuming lip-sync generation");
                handle
            }
            None => {
                let handle = self
                    .providers
                    .lipsync
                    .submit(&final_video.artifact.url, &dubbed.artifact.url)
                    .await?;
                self.memo
                    .set(&memo_key, &handle, self.config.lipsync_handle_ttl)
                    .await?;
                info!(job_id = %ctx.job.id, handle = %handle, "Lip-sync generation submitted");
                handle
            }
        };

        let provider = self.providers.lipsync.clone();
        let outcome = poll_until("lip-sync generation", self.config.lipsync_poll, || {
            let provider = provider.clone();
            let handle = handle.clone();
            async move {
                Ok(match provider.poll(&handle).await? {
                    LipSyncStatus::Pending => None,
                    LipSyncStatus::Completed { url } => Some(LipSyncPoll::Done(url)),
                    LipSyncStatus::Failed { reason } => Some(LipSyncPoll::Rejected(reason)),
                })
            }
        })
        .await?;

        let result_url = match outcome {
            LipSyncPoll::Done(url) => url,
            LipSyncPoll::Rejected(reason) => {
                // A rejected generation must not be resumed by the next attempt.
                self.memo.delete(&memo_key).await?;
                return Err(Error::provider("lipsync", reason));
            }
        };

        let local = ctx.dir.join("lipsync.mp4");
        self.storage.download(&result_url, &local).await?;
        let file_name = format!("{}-lipsync-{}.mp4", ctx.hash(), ctx.language());
        let url = self
            .storage
            .put_file(&Self::output_name(ctx, &key, &file_name), &local)
            .await?;
        let artifact = self
            .record(
                ctx,
                &key,
                ArtifactType::LipsyncedVideo,
                url,
                &[("generation", handle.as_str())],
            )
            .await?;
        self.memo.delete(&memo_key).await?;
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.lipsync_poll.interval, Duration::from_secs(5));
        assert_eq!(config.lipsync_poll.max_wait, Duration::from_secs(600));
        assert!(config.default_voice_id.is_none());
    }
}
