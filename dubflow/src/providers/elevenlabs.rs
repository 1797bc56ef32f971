//! ElevenLabs speech-to-text (with diarization) and text-to-speech.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{RawTranscription, SpeechSynthesizer, Transcriber};
use crate::domain::Segment;
use crate::utils::http_client::ensure_success;
use crate::{Error, Result};

const PROVIDER: &str = "elevenlabs";

/// A silence longer than this between two words of the same speaker starts a new segment.
const MAX_PAUSE_SECS: f64 = 1.0;

/// Speaker id used when the provider does not label a word.
const UNKNOWN_SPEAKER: &str = "speaker_0";

#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub base_url: String,
    pub stt_model: String,
    pub tts_model: String,
}

impl ElevenLabsConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.elevenlabs.io".to_string(),
            stt_model: "scribe_v1".to_string(),
            tts_model: "eleven_multilingual_v2".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub struct ElevenLabsClient {
    config: ElevenLabsConfig,
    client: Client,
}

impl ElevenLabsClient {
    pub fn new(config: ElevenLabsConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct SpeechToTextResponse {
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Clone, Deserialize)]
struct Word {
    text: String,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    speaker_id: Option<String>,
    #[serde(default)]
    logprob: Option<f64>,
}

impl Word {
    fn is_spacing(&self) -> bool {
        self.kind.as_deref() == Some("spacing")
    }

    fn is_audio_event(&self) -> bool {
        self.kind.as_deref() == Some("audio_event")
    }
}

#[derive(Default)]
struct Turn {
    start: f64,
    end: f64,
    speaker: String,
    text: String,
    logprob_sum: f64,
    logprob_count: u32,
}

impl Turn {
    fn into_segment(self) -> Option<Segment> {
        let text = self.text.trim().to_string();
        if text.is_empty() || self.end <= self.start {
            return None;
        }
        let segment = Segment::new(self.start, self.end, self.speaker, text);
        if self.logprob_count == 0 {
            return Some(segment);
        }
        let confidence = (self.logprob_sum / f64::from(self.logprob_count)).exp();
        Some(segment.with_confidence(confidence.clamp(0.0, 1.0) as f32))
    }
}

/// Group word-level output into speaker turns.
///
/// A turn ends when the speaker changes or when the pause before the next
/// word exceeds [`MAX_PAUSE_SECS`]. Spacing tokens are kept inside a turn and
/// audio events (laughter, music) are dropped.
fn group_words(words: &[Word]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current: Option<Turn> = None;

    for word in words {
        if word.is_audio_event() {
            continue;
        }
        if word.is_spacing() {
            if let Some(turn) = current.as_mut() {
                turn.text.push_str(&word.text);
            }
            continue;
        }

        let speaker = word
            .speaker_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());
        let starts_new_turn = current
            .as_ref()
            .is_none_or(|t| t.speaker != speaker || word.start - t.end > MAX_PAUSE_SECS);

        if starts_new_turn {
            if let Some(segment) = current.take().and_then(Turn::into_segment) {
                segments.push(segment);
            }
            current = Some(Turn {
                start: word.start,
                end: word.end,
                speaker,
                ..Default::default()
            });
        }

        if let Some(turn) = current.as_mut() {
            turn.text.push_str(&word.text);
            turn.end = turn.end.max(word.end);
            if let Some(logprob) = word.logprob {
                turn.logprob_sum += logprob;
                turn.logprob_count += 1;
            }
        }
    }

    if let Some(segment) = current.and_then(Turn::into_segment) {
        segments.push(segment);
    }
    segments
}

#[async_trait]
impl Transcriber for ElevenLabsClient {
    async fn transcribe(&self, audio: &Path) -> Result<RawTranscription> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| Error::io_path("reading", audio, e))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let form = Form::new()
            .text("model_id", self.config.stt_model.clone())
            .text("diarize", "true")
            .text("timestamps_granularity", "word")
            .part(
                "file",
                Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("audio/mpeg")?,
            );

        debug!(audio = %audio.display(), "Submitting speech-to-text request");
        let response = self
            .client
            .post(self.endpoint("/v1/speech-to-text"))
            .header("xi-api-key", &self.config.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = ensure_success(PROVIDER, response).await?;
        let body: SpeechToTextResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("malformed transcription: {e}")))?;

        let segments = group_words(&body.words);
        info!(
            words = body.words.len(),
            segments = segments.len(),
            language = ?body.language_code,
            "Transcription received"
        );
        Ok(RawTranscription {
            language: body.language_code.filter(|l| !l.is_empty()),
            segments,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Bytes> {
        let response = self
            .client
            .post(self.endpoint(&format!("/v1/text-to-speech/{voice_id}")))
            .header("xi-api-key", &self.config.api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": self.config.tts_model,
            }))
            .send()
            .await?;
        let response = ensure_success(PROVIDER, response).await?;
        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::provider(PROVIDER, "text-to-speech returned no audio"));
        }
        Ok(audio)
    }
}
