//! Speaker to synthesis-voice bindings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Binds one detected speaker of a job to a synthesis voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceMapping {
    pub job_id: String,
    pub speaker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
    pub voice_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VoiceMapping {
    pub fn new(
        job_id: impl Into<String>,
        speaker_id: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            speaker_id: speaker_id.into(),
            speaker_name: None,
            voice_id: voice_id.into(),
            voice_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_names(mut self, speaker_name: Option<String>, voice_name: Option<String>) -> Self {
        self.speaker_name = speaker_name;
        self.voice_name = voice_name;
        self
    }
}

/// The speaker to voice map actually used for one synthesis run.
///
/// Ordered so that it serializes identically for identical assignments, which
/// lets it take part in cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceAssignment(BTreeMap<String, String>);

impl VoiceAssignment {
    /// Resolve a voice for every speaker, falling back to `default_voice` for unmapped ones.
    pub fn resolve(speakers: &[String], mappings: &[VoiceMapping], default_voice: &str) -> Self {
        let assignment = speakers
            .iter()
            .map(|speaker| {
                let voice = mappings
                    .iter()
                    .find(|m| &m.speaker_id == speaker)
                    .map(|m| m.voice_id.clone())
                    .unwrap_or_else(|| default_voice.to_string());
                (speaker.clone(), voice)
            })
            .collect();
        Self(assignment)
    }

    pub fn voice_for(&self, speaker: &str) -> Option<&str> {
        self.0.get(speaker).map(String::as_str)
    }

    /// Stable textual form used when deriving cache keys.
    pub fn fingerprint(&self) -> String {
        self.0
            .iter()
            .map(|(speaker, voice)| format!("{speaker}={voice}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}
