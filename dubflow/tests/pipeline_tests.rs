mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{DEFAULT_VOICE, Harness, HarnessOptions, PUBLIC_BASE};
use dubflow::cache::{ContentCache, ExpiringCache, compute_content_hash};
use dubflow::database::models::QueueState;
use dubflow::domain::{Artifact, ArtifactType, Job, JobStatus, RetryPolicy, Segment};
use dubflow::pipeline::{DubbingRequest, FailureOutcome, JobRunner, WorkerPool, WorkerPoolConfig};
use dubflow::pipeline::{PollPolicy, RateLimiterConfig, StartRateLimiter};
use dubflow::services::{Submission, VoiceMappingInput};
use dubflow::storage::BlobStorage;

const VIDEO: &[u8] = b"fake video bytes";

#[tokio::test]
async fn test_dub_into_french_end_to_end() {
    let h = Harness::new().await;
    let job_id = h.submit(VIDEO, "fr", false).await;

    let (outcome, updates) = h.run_next().await.unwrap();
    assert!(outcome.is_none());

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    assert_eq!(status.job.progress, 100);
    assert!(status.job.completed_at.is_some());
    assert!(status.job.error.is_none());

    let translation = h.service.get_transcript(&job_id, "fr").await.unwrap();
    let pairs: Vec<(&str, &str)> = translation
        .segments
        .iter()
        .map(|s| (s.speaker.as_str(), s.text.as_str()))
        .collect();
    assert_eq!(pairs, vec![("Speaker 1", "Bonjour"), ("Speaker 2", "Monde")]);
    assert_eq!(translation.segments[1].start, 2.0);
    assert_eq!(translation.detected_language.as_deref(), Some("en"));

    let original = h.service.get_transcript(&job_id, "original").await.unwrap();
    assert_eq!(original.speakers, vec!["Speaker 1", "Speaker 2"]);

    // Progress never goes backwards and ends at 100.
    let percents: Vec<u8> = updates.iter().map(|u| u.snapshot.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.last(), Some(&100));

    let hash = compute_content_hash(VIDEO);
    let ready = status.ready_video_url.unwrap();
    assert!(ready.starts_with(&format!("{PUBLIC_BASE}/{hash}/")));
    assert!(ready.ends_with(&format!("{hash}-dubbed-fr.mp4")));
    assert!(
        status
            .artifacts
            .iter()
            .all(|a| a.artifact_type != ArtifactType::LipsyncedVideo)
    );
    assert_eq!(h.fakes.lipsync.submits.load(Ordering::SeqCst), 0);

    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_identical_resubmit_is_served_from_cache() {
    let h = Harness::new().await;
    let first = h.submit(VIDEO, "fr", false).await;
    h.drain().await;
    let calls = h.fakes.provider_calls();

    let outcome = h
        .service
        .submit(Submission {
            bytes: VIDEO.to_vec(),
            filename: "renamed.mp4".to_string(),
            target_language: " fr ".to_string(),
            lipsync: false,
        })
        .await
        .unwrap();
    assert!(outcome.cached);
    assert_eq!(outcome.job_id, first);

    assert!(h.run_next().await.is_none());
    assert_eq!(h.fakes.provider_calls(), calls);
}

#[tokio::test]
async fn test_new_language_reuses_audio_and_transcript() {
    let h = Harness::new().await;
    h.submit(VIDEO, "fr", false).await;
    h.drain().await;

    let de = h.submit(VIDEO, "de", false).await;
    h.drain().await;

    assert_eq!(h.fakes.media.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.fakes.transcriber.calls.load(Ordering::SeqCst), 1);
    // Two segments per language.
    assert_eq!(h.fakes.translator.calls.load(Ordering::SeqCst), 4);

    let status = h.service.job_status(&de).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    let audio = status
        .artifacts
        .iter()
        .find(|a| a.artifact_type == ArtifactType::ExtractedAudio)
        .unwrap();
    assert!(audio.metadata.contains_key("reused_from"));
}

#[tokio::test]
async fn test_content_hash_is_deterministic() {
    let h = Harness::new().await;
    let a = compute_content_hash(VIDEO);
    assert_eq!(a, compute_content_hash(VIDEO));
    assert_eq!(a.len(), 64);
    assert_ne!(a, compute_content_hash(b"other bytes"));

    let job_id = h.submit(VIDEO, "fr", false).await;
    let job = h.repos.jobs.get_job(&job_id).await.unwrap();
    assert_eq!(job.content_hash, a);
    assert_eq!(job.original_filename, "ad.mp4");
}

#[tokio::test]
async fn test_voice_mapping_drives_synthesis() {
    let h = Harness::new().await;
    let job_id = h.submit(VIDEO, "fr", false).await;
    h.service
        .upsert_voice_mapping(
            &job_id,
            "Speaker 1",
            VoiceMappingInput {
                voice_id: "voice-anna".to_string(),
                speaker_name: Some("Anna".to_string()),
                voice_name: None,
            },
        )
        .await
        .unwrap();

    h.drain().await;

    let voices = h.fakes.speech.voices.lock().clone();
    assert_eq!(voices, vec!["voice-anna".to_string(), DEFAULT_VOICE.to_string()]);

    let plan = h.fakes.media.last_plan.lock().clone();
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].start, 0.0);
    assert_eq!(plan[1].start, 2.0);
}

#[tokio::test]
async fn test_missing_voice_fails_without_retry() {
    let h = Harness::with_options(HarnessOptions {
        default_voice: None,
        ..Default::default()
    })
    .await;
    let job_id = h.submit(VIDEO, "fr", false).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert_eq!(outcome, Some(FailureOutcome::Failed));

    let job = h.repos.jobs.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("Speaker 1"));
    assert_eq!(job.current_stage.as_deref(), Some("generate_speech"));
}

#[tokio::test]
async fn test_translation_failure_fails_job() {
    let h = Harness::with_options(HarnessOptions {
        retry: RetryPolicy::no_retry(),
        ..Default::default()
    })
    .await;
    h.fakes.translator.fail.store(true, Ordering::SeqCst);
    let job_id = h.submit(VIDEO, "fr", false).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert_eq!(outcome, Some(FailureOutcome::Failed));

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Failed);
    assert!(status.job.completed_at.is_none());
    assert!(status.ready_video_url.is_none());
    let error = status.job.error.unwrap();
    assert!(error.contains("translate"), "{error}");
    let queue = status.queue.unwrap();
    assert_eq!(queue.state, QueueState::Failed);
    assert_eq!(queue.attempts, 1);
}

#[tokio::test]
async fn test_transient_failure_retries_until_attempts_run_out() {
    let h = Harness::new().await;
    h.fakes.translator.fail.store(true, Ordering::SeqCst);
    let job_id = h.submit(VIDEO, "fr", false).await;

    for attempt in 1..=2 {
        let (outcome, _) = h.run_next().await.unwrap();
        assert_eq!(
            outcome,
            Some(FailureOutcome::Retrying {
                attempt,
                delay: Duration::ZERO
            })
        );
        let job = h.repos.jobs.get_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    let (outcome, _) = h.run_next().await.unwrap();
    assert_eq!(outcome, Some(FailureOutcome::Failed));
    assert!(h.run_next().await.is_none());

    // Extraction and transcription were cached by the first attempt.
    assert_eq!(h.fakes.media.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.fakes.transcriber.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() {
    let h = Harness::new().await;
    h.fakes.translator.fail.store(true, Ordering::SeqCst);
    let job_id = h.submit(VIDEO, "fr", false).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert!(matches!(outcome, Some(FailureOutcome::Retrying { .. })));

    h.fakes.translator.fail.store(false, Ordering::SeqCst);
    let (outcome, _) = h.run_next().await.unwrap();
    assert!(outcome.is_none());

    let job = h.repos.jobs.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());
}

#[tokio::test]
async fn test_malformed_transcription_is_retried() {
    let h = Harness::new().await;
    *h.fakes.transcriber.segments.lock() = vec![
        Segment::new(0.0, 3.0, "Speaker 1", "Hello"),
        Segment::new(2.0, 4.0, "Speaker 1", "again"),
    ];
    let job_id = h.submit(VIDEO, "fr", false).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert!(
        matches!(outcome, Some(FailureOutcome::Retrying { attempt: 1, .. })),
        "{outcome:?}"
    );
    let job = h.repos.jobs.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    let error = job.error.unwrap();
    assert!(error.contains("transcriber"), "{error}");

    // A well-formed answer on the next attempt completes the job.
    *h.fakes.transcriber.segments.lock() = common::two_speaker_segments();
    let (outcome, _) = h.run_next().await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(h.fakes.transcriber.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_transcription_fails_without_retry() {
    let h = Harness::new().await;
    h.fakes.transcriber.segments.lock().clear();
    let job_id = h.submit(VIDEO, "fr", false).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert_eq!(outcome, Some(FailureOutcome::Failed));
    let job = h.repos.jobs.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

async fn lipsync_memo(h: &Harness, final_video: &Artifact) -> Option<String> {
    let key = final_video.content_hash.as_deref().unwrap();
    ExpiringCache::new(h.repos.cache.clone())
        .get::<String>(&format!("lipsync:{key}"))
        .await
        .unwrap()
}

fn find_artifact(artifacts: &[Artifact], artifact_type: ArtifactType) -> Option<&Artifact> {
    artifacts.iter().find(|a| a.artifact_type == artifact_type)
}

#[tokio::test]
async fn test_lipsync_rejection_keeps_final_video() {
    let h = Harness::new().await;
    h.fakes.lipsync.reject.store(true, Ordering::SeqCst);
    let job_id = h.submit(VIDEO, "fr", true).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert!(matches!(outcome, Some(FailureOutcome::Retrying { .. })));

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Pending);
    assert!(status.ready_video_url.is_none());
    assert!(status.job.error.as_deref().unwrap().contains("no face detected"));
    let final_video = find_artifact(&status.artifacts, ArtifactType::FinalVideo)
        .unwrap()
        .clone();
    assert!(find_artifact(&status.artifacts, ArtifactType::LipsyncedVideo).is_none());

    // The rejected generation is forgotten, so the retry submits a new one.
    assert!(lipsync_memo(&h, &final_video).await.is_none());
    h.fakes.lipsync.reject.store(false, Ordering::SeqCst);
    let (outcome, _) = h.run_next().await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(h.fakes.lipsync.submits.load(Ordering::SeqCst), 2);
    assert_eq!(h.fakes.media.mux_calls.load(Ordering::SeqCst), 1);

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    assert!(find_artifact(&status.artifacts, ArtifactType::FinalVideo).is_some());
    let lipsynced = find_artifact(&status.artifacts, ArtifactType::LipsyncedVideo).unwrap();
    assert_eq!(status.ready_video_url.as_deref(), Some(lipsynced.url.as_str()));
}

#[tokio::test]
async fn test_lipsync_poll_error_resumes_submitted_generation() {
    let h = Harness::new().await;
    h.fakes.lipsync.poll_errors.store(1, Ordering::SeqCst);
    let job_id = h.submit(VIDEO, "fr", true).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert!(matches!(outcome, Some(FailureOutcome::Retrying { .. })));

    let status = h.service.job_status(&job_id).await.unwrap();
    let final_video = find_artifact(&status.artifacts, ArtifactType::FinalVideo).unwrap();
    assert_eq!(lipsync_memo(&h, final_video).await.as_deref(), Some("gen-1"));

    let (outcome, _) = h.run_next().await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(h.fakes.lipsync.submits.load(Ordering::SeqCst), 1);

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    let final_video = find_artifact(&status.artifacts, ArtifactType::FinalVideo).unwrap();
    assert!(lipsync_memo(&h, final_video).await.is_none());
    let lipsynced = find_artifact(&status.artifacts, ArtifactType::LipsyncedVideo).unwrap();
    assert_eq!(lipsynced.metadata.get("generation").map(String::as_str), Some("gen-1"));
}

#[tokio::test]
async fn test_lipsync_timeout_is_retryable() {
    let h = Harness::with_options(HarnessOptions {
        lipsync_poll: PollPolicy::new(Duration::from_millis(10), Duration::from_millis(60)),
        ..Default::default()
    })
    .await;
    h.fakes.lipsync.stall.store(true, Ordering::SeqCst);
    let job_id = h.submit(VIDEO, "fr", true).await;

    let (outcome, _) = h.run_next().await.unwrap();
    assert!(matches!(outcome, Some(FailureOutcome::Retrying { .. })));

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.current_stage.as_deref(), Some("lipsync"));
    let error = status.job.error.unwrap();
    assert!(error.contains("waiting for lip-sync generation"), "{error}");
    assert!(find_artifact(&status.artifacts, ArtifactType::FinalVideo).is_some());
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_lipsync_result_becomes_ready_video() {
    let h = Harness::new().await;
    let job_id = h.submit(VIDEO, "fr", true).await;
    h.drain().await;

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);

    let hash = compute_content_hash(VIDEO);
    let ready = status.ready_video_url.unwrap();
    assert!(ready.ends_with(&format!("{hash}-lipsync-fr.mp4")), "{ready}");
    let lipsynced = status
        .artifacts
        .iter()
        .find(|a| a.artifact_type == ArtifactType::LipsyncedVideo)
        .unwrap();
    assert_eq!(lipsynced.url, ready);
    assert_eq!(h.fakes.lipsync.submits.load(Ordering::SeqCst), 1);
    assert!(h.fakes.lipsync.polls.load(Ordering::SeqCst) >= 2);

    let copy = h.storage.root().join(ready.trim_start_matches(&format!("{PUBLIC_BASE}/")));
    assert_eq!(std::fs::read(copy).unwrap(), b"lipsynced");
    assert!(h.work_dir_is_empty());
}

#[tokio::test]
async fn test_known_hash_scenario() {
    let h = Harness::new().await;
    let url = h.storage.put("abc123/ad.mp4", VIDEO).await.unwrap();
    let job = Job::new("abc123", "ad.mp4", url, "es", false);
    h.repos.jobs.create_job(&job).await.unwrap();
    h.queue
        .enqueue(&DubbingRequest {
            job_id: job.id.clone(),
            content_hash: "abc123".to_string(),
            target_language: "es".to_string(),
            lipsync: false,
        })
        .await
        .unwrap();

    h.drain().await;

    let status = h.service.job_status(&job.id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    let final_video = status
        .artifacts
        .iter()
        .find(|a| a.artifact_type == ArtifactType::FinalVideo)
        .unwrap();
    assert!(final_video.url.ends_with("abc123-dubbed-es.mp4"));
    assert_eq!(status.ready_video_url.as_deref(), Some(final_video.url.as_str()));

    let cache = ContentCache::new(
        h.repos.artifacts.clone(),
        h.repos.transcripts.clone(),
        h.repos.jobs.clone(),
    );
    let found = cache.lookup_job("abc123", "es").await.unwrap().unwrap();
    assert_eq!(found.id, job.id);
    assert!(cache.lookup_job("abc123", "fr").await.unwrap().is_none());
}

#[tokio::test]
async fn test_redub_uses_edited_translation() {
    let h = Harness::new().await;
    let job_id = h.submit(VIDEO, "fr", false).await;
    h.drain().await;
    let translations = h.fakes.translator.calls.load(Ordering::SeqCst);
    let before = h.service.job_status(&job_id).await.unwrap().ready_video_url;

    h.service
        .save_transcript(
            &job_id,
            "fr",
            vec![
                Segment::new(2.0, 4.5, "Speaker 2", "Le monde"),
                Segment::new(0.0, 2.0, "Speaker 1", "Salut"),
            ],
        )
        .await
        .unwrap();
    let job = h.service.redub(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    h.drain().await;

    let status = h.service.job_status(&job_id).await.unwrap();
    assert_eq!(status.job.status, JobStatus::Completed);
    assert_eq!(h.fakes.translator.calls.load(Ordering::SeqCst), translations);
    assert_ne!(status.ready_video_url, before);

    let voices = h.fakes.speech.voices.lock().len();
    assert_eq!(voices, 4);
    assert_eq!(h.fakes.media.extract_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_redub_after_original_edit_translates_again() {
    let h = Harness::new().await;
    let job_id = h.submit(VIDEO, "fr", false).await;
    h.drain().await;
    assert_eq!(h.fakes.translator.calls.load(Ordering::SeqCst), 2);

    // Keep the new version strictly newer than the stored translation.
    tokio::time::sleep(Duration::from_millis(5)).await;
    h.service
        .save_transcript(
            &job_id,
            "original",
            vec![
                Segment::new(0.0, 2.0, "Speaker 1", "Hello"),
                Segment::new(2.0, 4.5, "Speaker 2", "Everyone"),
            ],
        )
        .await
        .unwrap();
    h.service.redub(&job_id).await.unwrap();
    h.drain().await;

    assert_eq!(h.fakes.translator.calls.load(Ordering::SeqCst), 4);
    let translation = h.service.get_transcript(&job_id, "fr").await.unwrap();
    assert_eq!(translation.segments[1].text, "[fr] Everyone");
}

#[tokio::test]
async fn test_worker_pool_runs_submitted_jobs() {
    let h = Harness::new().await;
    let ids = vec![
        h.submit(b"video one", "fr", false).await,
        h.submit(b"video two", "de", false).await,
        h.submit(b"video three", "es", false).await,
    ];

    let pool = WorkerPool::with_config(WorkerPoolConfig {
        max_workers: 2,
        job_timeout_secs: 30,
        poll_interval_ms: 20,
    });
    let runner: Arc<dyn JobRunner> = h.pipeline.clone();
    let limiter = Arc::new(StartRateLimiter::new(RateLimiterConfig::default()));
    pool.start(h.queue.clone(), runner, limiter);

    let done = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut completed = 0;
            for id in &ids {
                if h.repos.jobs.get_job(id).await.unwrap().status == JobStatus::Completed {
                    completed += 1;
                }
            }
            if completed == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    pool.stop().await;

    assert!(done.is_ok(), "jobs did not complete in time");
    let stats = h.queue.get_stats().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert!(h.work_dir_is_empty());
}
