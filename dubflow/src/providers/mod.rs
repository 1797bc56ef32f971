//! External capability providers.
//!
//! The pipeline only sees these traits. Concrete adapters talk to ffmpeg and
//! the hosted speech, translation and lip-sync services; tests substitute fakes.

pub mod deepl;
pub mod elevenlabs;
pub mod ffmpeg;
pub mod sync;

pub use deepl::{DeepLConfig, DeepLTranslator};
pub use elevenlabs::{ElevenLabsClient, ElevenLabsConfig};
pub use ffmpeg::FfmpegToolkit;
pub use sync::{SyncConfig, SyncLipSync};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ProviderSettings;
use crate::domain::Segment;
use crate::{Error, Result};

/// One synthesized clip placed on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedClip {
    pub path: PathBuf,
    /// Offset of the clip on the output timeline in seconds.
    pub start: f64,
    /// Longest the clip may play before it is cut; `None` plays it to the end.
    pub max_duration: Option<f64>,
}

/// Local media manipulation.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Extract the audio track of `video` into `output`.
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;
    /// Lay the clips onto one silent timeline and write the result to `output`.
    async fn assemble_track(&self, clips: &[AlignedClip], output: &Path) -> Result<()>;
    /// Replace the audio of `video` with `audio`, keeping the video stream as is.
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}

/// Result of speech-to-text with diarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTranscription {
    /// Language the provider detected, if it reports one.
    pub language: Option<String>,
    /// Speaker-labelled segments; not necessarily sorted.
    pub segments: Vec<Segment>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<RawTranscription>;
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate one piece of text. `source` is `None` when unknown.
    async fn translate(&self, text: &str, source: Option<&str>, target: &str) -> Result<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Render `text` with the given voice; returns encoded audio (mp3).
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Bytes>;
}

/// State of a remote lip-sync generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LipSyncStatus {
    Pending,
    Completed { url: String },
    Failed { reason: String },
}

#[async_trait]
pub trait LipSyncProvider: Send + Sync {
    /// Start a generation and return the provider's handle for it.
    async fn submit(&self, video_url: &str, audio_url: &str) -> Result<String>;
    async fn poll(&self, handle: &str) -> Result<LipSyncStatus>;
}

/// Every provider the pipeline calls, injected as trait objects.
#[derive(Clone)]
pub struct Providers {
    pub media: Arc<dyn MediaToolkit>,
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub lipsync: Arc<dyn LipSyncProvider>,
}

impl Providers {
    /// Build the production adapters from configuration.
    ///
    /// Transcription, synthesis and translation are required. Without a
    /// lip-sync key the service still runs; jobs that request lip-sync fail
    /// with a configuration error.
    pub fn from_settings(settings: &ProviderSettings, client: Client) -> Result<Self> {
        let elevenlabs_key = settings
            .elevenlabs_api_key
            .clone()
            .ok_or_else(|| Error::config("ELEVENLABS_API_KEY is not set"))?;
        let deepl_key = settings
            .deepl_api_key
            .clone()
            .ok_or_else(|| Error::config("DEEPL_API_KEY is not set"))?;

        let mut elevenlabs_config = ElevenLabsConfig::new(elevenlabs_key);
        if let Some(url) = &settings.elevenlabs_base_url {
            elevenlabs_config = elevenlabs_config.with_base_url(url.clone());
        }
        let elevenlabs = Arc::new(ElevenLabsClient::new(elevenlabs_config, client.clone()));

        let mut deepl_config = DeepLConfig::new(deepl_key);
        if let Some(url) = &settings.deepl_base_url {
            deepl_config = deepl_config.with_base_url(url.clone());
        }

        let lipsync: Arc<dyn LipSyncProvider> = match &settings.sync_api_key {
            Some(key) => {
                let mut sync_config = SyncConfig::new(key.clone());
                if let Some(url) = &settings.sync_base_url {
                    sync_config = sync_config.with_base_url(url.clone());
                }
                Arc::new(SyncLipSync::new(sync_config, client.clone()))
            }
            None => {
                warn!("SYNC_API_KEY is not set; lip-sync requests will fail");
                Arc::new(UnconfiguredLipSync)
            }
        };

        let media = match &settings.ffmpeg_path {
            Some(path) => FfmpegToolkit::new(path.clone()),
            None => FfmpegToolkit::default(),
        };

        Ok(Self {
            media: Arc::new(media),
            transcriber: elevenlabs.clone(),
            translator: Arc::new(DeepLTranslator::new(deepl_config, client)),
            speech: elevenlabs,
            lipsync,
        })
    }
}

/// Stand-in used when no lip-sync provider is configured.
struct UnconfiguredLipSync;

#[async_trait]
impl LipSyncProvider for UnconfiguredLipSync {
    async fn submit(&self, _video_url: &str, _audio_url: &str) -> Result<String> {
        Err(Error::config("lip-sync requested but SYNC_API_KEY is not set"))
    }

    async fn poll(&self, handle: &str) -> Result<LipSyncStatus> {
        Err(Error::config(format!(
            "cannot poll lip-sync generation {handle}: SYNC_API_KEY is not set"
        )))
    }
}
