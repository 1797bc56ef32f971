//! Shared fixtures: in-memory database, temp blob storage and fake providers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use dubflow::database::{DbPool, Repositories, init_memory_pool, run_migrations};
use dubflow::domain::{RetryPolicy, Segment};
use dubflow::pipeline::{
    DubbingPipeline, FailureOutcome, JobProgressUpdate, JobQueue, PipelineConfig, PollPolicy,
    ProgressReporter,
};
use dubflow::providers::{
    AlignedClip, LipSyncProvider, LipSyncStatus, MediaToolkit, Providers, RawTranscription,
    SpeechSynthesizer, Transcriber, Translator,
};
use dubflow::services::{DubbingService, DubbingServiceConfig, Submission};
use dubflow::storage::{BlobStorage, LocalBlobStorage};
use dubflow::utils::http_client::build_client;
use dubflow::{Error, Result};

pub const PUBLIC_BASE: &str = "http://files.test";
pub const DEFAULT_VOICE: &str = "voice-default";

/// Writes small marker files instead of running ffmpeg.
#[derive(Default)]
pub struct FakeMedia {
    pub extract_calls: AtomicUsize,
    pub assemble_calls: AtomicUsize,
    pub mux_calls: AtomicUsize,
    pub last_plan: Mutex<Vec<AlignedClip>>,
}

#[async_trait]
impl MediaToolkit for FakeMedia {
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = b"audio:".to_vec();
        bytes.extend(tokio::fs::read(video).await?);
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }

    async fn assemble_track(&self, clips: &[AlignedClip], output: &Path) -> Result<()> {
        self.assemble_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_plan.lock() = clips.to_vec();
        let mut bytes = Vec::new();
        for clip in clips {
            bytes.extend(tokio::fs::read(&clip.path).await?);
            bytes.push(b'|');
        }
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.mux_calls.fetch_add(1, Ordering::SeqCst);
        let mut bytes = tokio::fs::read(video).await?;
        bytes.extend(b"+".iter());
        bytes.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

pub struct FakeTranscriber {
    pub calls: AtomicUsize,
    pub segments: Mutex<Vec<Segment>>,
}

impl FakeTranscriber {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            segments: Mutex::new(segments),
        }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio: &Path) -> Result<RawTranscription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawTranscription {
            language: Some("EN".to_string()),
            segments: self.segments.lock().clone(),
        })
    }
}

/// Prefixes text with the target language; can be switched to fail.
#[derive(Default)]
pub struct FakeTranslator {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, text: &str, _source: Option<&str>, target: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::provider("translator", "HTTP 503: unavailable"));
        }
        Ok(match (target, text) {
            ("fr", "Hello") => "Bonjour".to_string(),
            ("fr", "World") => "Monde".to_string(),
            _ => format!("[{target}] {text}"),
        })
    }
}

#[derive(Default)]
pub struct FakeSpeech {
    pub calls: AtomicUsize,
    pub voices: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.voices.lock().push(voice_id.to_string());
        Ok(Bytes::from(format!("{voice_id}:{text}")))
    }
}

/// Completes after one pending poll with a result stored in blob storage.
///
/// `reject` makes the generation fail, `stall` keeps it pending forever and
/// `poll_errors` makes that many polls fail with a transient provider error.
#[derive(Default)]
pub struct FakeLipSync {
    pub submits: AtomicUsize,
    pub polls: AtomicUsize,
    pub result_url: Mutex<String>,
    pub reject: AtomicBool,
    pub stall: AtomicBool,
    pub poll_errors: AtomicUsize,
}

#[async_trait]
impl LipSyncProvider for FakeLipSync {
    async fn submit(&self, _video_url: &str, _audio_url: &str) -> Result<String> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        Ok(format!("gen-{}", n + 1))
    }

    async fn poll(&self, _handle: &str) -> Result<LipSyncStatus> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        if self
            .poll_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(Error::provider("lipsync", "HTTP 502: bad gateway"));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Ok(LipSyncStatus::Failed {
                reason: "no face detected".to_string(),
            });
        }
        if n == 0 || self.stall.load(Ordering::SeqCst) {
            return Ok(LipSyncStatus::Pending);
        }
        Ok(LipSyncStatus::Completed {
            url: self.result_url.lock().clone(),
        })
    }
}

pub struct Fakes {
    pub media: Arc<FakeMedia>,
    pub transcriber: Arc<FakeTranscriber>,
    pub translator: Arc<FakeTranslator>,
    pub speech: Arc<FakeSpeech>,
    pub lipsync: Arc<FakeLipSync>,
}

impl Fakes {
    pub fn provider_calls(&self) -> usize {
        self.media.extract_calls.load(Ordering::SeqCst)
            + self.media.assemble_calls.load(Ordering::SeqCst)
            + self.media.mux_calls.load(Ordering::SeqCst)
            + self.transcriber.calls.load(Ordering::SeqCst)
            + self.translator.calls.load(Ordering::SeqCst)
            + self.speech.calls.load(Ordering::SeqCst)
            + self.lipsync.submits.load(Ordering::SeqCst)
    }
}

pub fn two_speaker_segments() -> Vec<Segment> {
    vec![
        Segment::new(0.0, 2.0, "Speaker 1", "Hello"),
        Segment::new(2.0, 4.5, "Speaker 2", "World"),
    ]
}

pub struct Harness {
    pub pool: DbPool,
    pub repos: Repositories,
    pub queue: Arc<JobQueue>,
    pub service: Arc<DubbingService>,
    pub pipeline: Arc<DubbingPipeline>,
    pub storage: Arc<LocalBlobStorage>,
    pub fakes: Fakes,
    pub work_dir: PathBuf,
    _dir: TempDir,
}

pub struct HarnessOptions {
    pub retry: RetryPolicy,
    pub default_voice: Option<String>,
    pub lipsync_poll: PollPolicy,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default()
                .with_initial_delay(Duration::ZERO)
                .without_jitter(),
            default_voice: Some(DEFAULT_VOICE.to_string()),
            lipsync_poll: PollPolicy::new(Duration::from_millis(10), Duration::from_secs(5)),
        }
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let pool = init_memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repos = Repositories::sqlx(pool.clone());

        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("work");
        let storage = Arc::new(LocalBlobStorage::new(
            dir.path().join("blobs"),
            PUBLIC_BASE,
            build_client(Duration::from_secs(5)).unwrap(),
        ));

        let lipsync_result = storage
            .put("provider/lipsync-result.mp4", b"lipsynced")
            .await
            .unwrap();
        let fakes = Fakes {
            media: Arc::new(FakeMedia::default()),
            transcriber: Arc::new(FakeTranscriber::new(two_speaker_segments())),
            translator: Arc::new(FakeTranslator::default()),
            speech: Arc::new(FakeSpeech::default()),
            lipsync: Arc::new(FakeLipSync {
                result_url: Mutex::new(lipsync_result),
                ..Default::default()
            }),
        };
        let providers = Providers {
            media: fakes.media.clone(),
            transcriber: fakes.transcriber.clone(),
            translator: fakes.translator.clone(),
            speech: fakes.speech.clone(),
            lipsync: fakes.lipsync.clone(),
        };

        let queue = Arc::new(JobQueue::new(
            repos.queue.clone(),
            repos.jobs.clone(),
            options.retry,
        ));
        let service = Arc::new(DubbingService::new(
            DubbingServiceConfig::default(),
            repos.clone(),
            queue.clone(),
            storage.clone(),
        ));
        let pipeline = Arc::new(DubbingPipeline::new(
            repos.clone(),
            providers,
            storage.clone(),
            PipelineConfig {
                default_voice_id: options.default_voice,
                lipsync_poll: options.lipsync_poll,
                work_dir: Some(work_dir.clone()),
                ..Default::default()
            },
        ));

        Self {
            pool,
            repos,
            queue,
            service,
            pipeline,
            storage,
            fakes,
            work_dir,
            _dir: dir,
        }
    }

    pub async fn submit(&self, bytes: &[u8], language: &str, lipsync: bool) -> String {
        self.service
            .submit(Submission {
                bytes: bytes.to_vec(),
                filename: "ad.mp4".to_string(),
                target_language: language.to_string(),
                lipsync,
            })
            .await
            .unwrap()
            .job_id
    }

    /// Claim the next queue entry and run it the way a worker does.
    ///
    /// Returns `None` when nothing was claimable, otherwise the failure outcome
    /// (`None` inside on success) and every progress update the run published.
    pub async fn run_next(&self) -> Option<(Option<FailureOutcome>, Vec<JobProgressUpdate>)> {
        let claimed = self.queue.dequeue().await.unwrap()?;
        let (tx, mut rx) = mpsc::channel(1024);
        let reporter = ProgressReporter::new(claimed.job_id(), tx);

        let outcome = match self.pipeline.run(&claimed.request, &reporter).await {
            Ok(()) => {
                self.queue.complete(claimed.job_id()).await.unwrap();
                None
            }
            Err(e) => Some(self.queue.fail_or_retry(&claimed, &e).await.unwrap()),
        };
        drop(reporter);

        let mut updates = Vec::new();
        while let Some(update) = rx.recv().await {
            updates.push(update);
        }
        Some((outcome, updates))
    }

    /// Run claimable entries until the queue is drained.
    pub async fn drain(&self) {
        while self.run_next().await.is_some() {}
    }

    pub fn work_dir_is_empty(&self) -> bool {
        match std::fs::read_dir(&self.work_dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }
}
