//! Transcripts and their speaker-attributed segments.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Language tag used for the transcript of the source audio.
pub const ORIGINAL_LANGUAGE: &str = "original";

/// Tolerance used when comparing segment boundaries produced by floating point providers.
const TIME_EPSILON: f64 = 1e-3;

/// One speaker-attributed span of speech, `[start, end)` in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Segment {
    pub fn new(start: f64, end: f64, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            speaker: speaker.into(),
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Copy of this segment carrying different text; timing and speaker are kept.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }
}

/// A versioned transcription or translation of one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub job_id: String,
    pub content_hash: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    pub speakers: Vec<String>,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
}

impl Transcript {
    /// Build a new transcript version after validating its segments.
    pub fn new(
        job_id: impl Into<String>,
        content_hash: impl Into<String>,
        language: impl Into<String>,
        segments: Vec<Segment>,
    ) -> Result<Self> {
        validate_segments(&segments)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            content_hash: content_hash.into(),
            language: language.into(),
            detected_language: None,
            speakers: speakers_in_order(&segments),
            segments,
            created_at: Utc::now(),
        })
    }

    pub fn with_detected_language(mut self, language: Option<String>) -> Self {
        self.detected_language = language;
        self
    }

    pub fn is_original(&self) -> bool {
        self.language == ORIGINAL_LANGUAGE
    }

    /// Source language for translation: the detected language, if the provider reported one.
    pub fn source_language(&self) -> Option<&str> {
        self.detected_language.as_deref()
    }
}

/// Speaker ids in order of first appearance.
pub fn speakers_in_order(segments: &[Segment]) -> Vec<String> {
    let mut speakers: Vec<String> = Vec::new();
    for segment in segments {
        if !speakers.iter().any(|s| s == &segment.speaker) {
            speakers.push(segment.speaker.clone());
        }
    }
    speakers
}

/// Sort segments chronologically; ties keep provider order.
pub fn sort_chronologically(segments: &mut [Segment]) {
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
}

/// Check the invariants every stored transcript satisfies.
///
/// - times are finite, `start >= 0` and `end > start`
/// - confidence, when present, lies in `[0, 1]`
/// - the speaker id is non-empty
/// - segments are ordered by start time
/// - one speaker's turns never overlap each other (different speakers may talk over each other)
pub fn validate_segments(segments: &[Segment]) -> Result<()> {
    let mut previous_start = f64::NEG_INFINITY;
    let mut last_end_by_speaker: HashMap<&str, f64> = HashMap::new();

    for (index, segment) in segments.iter().enumerate() {
        if !segment.start.is_finite() || !segment.end.is_finite() {
            return Err(Error::validation(format!(
                "segment {index}: start and end must be finite numbers"
            )));
        }
        if segment.start < 0.0 {
            return Err(Error::validation(format!(
                "segment {index}: start {} is negative",
                segment.start
            )));
        }
        if segment.end <= segment.start {
            return Err(Error::validation(format!(
                "segment {index}: end {} must be greater than start {}",
                segment.end, segment.start
            )));
        }
        if let Some(confidence) = segment.confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            return Err(Error::validation(format!(
                "segment {index}: confidence {confidence} is outside [0, 1]"
            )));
        }
        if segment.speaker.trim().is_empty() {
            return Err(Error::validation(format!(
                "segment {index}: speaker is required"
            )));
        }
        if segment.start + TIME_EPSILON < previous_start {
            return Err(Error::validation(format!(
                "segment {index}: segments must be in chronological order"
            )));
        }
        if let Some(last_end) = last_end_by_speaker.get(segment.speaker.as_str())
            && segment.start + TIME_EPSILON < *last_end
        {
            return Err(Error::validation(format!(
                "segment {index}: overlaps the previous turn of {}",
                segment.speaker
            )));
        }

        previous_start = segment.start;
        last_end_by_speaker.insert(segment.speaker.as_str(), segment.end);
    }
    Ok(())
}
