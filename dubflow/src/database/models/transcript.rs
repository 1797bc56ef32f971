//! Transcript database model.
//!
//! Speakers and segments are stored as JSON text; they are decoded into typed
//! collections here and never leave the repository as raw strings.

use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, ms_to_datetime};
use crate::domain::{Segment, Transcript};
use crate::utils::json::{self, JsonContext};
use crate::{Error, Result};

/// Row of the `transcripts` table.
#[derive(Debug, Clone, FromRow)]
pub struct TranscriptDbModel {
    pub id: String,
    pub job_id: String,
    pub content_hash: String,
    pub language: String,
    pub detected_language: Option<String>,
    /// JSON array of speaker ids
    pub speakers: String,
    /// JSON array of segments
    pub segments: String,
    pub created_at: i64,
}

impl TranscriptDbModel {
    pub fn from_domain(transcript: &Transcript) -> Result<Self> {
        Ok(Self {
            id: transcript.id.clone(),
            job_id: transcript.job_id.clone(),
            content_hash: transcript.content_hash.clone(),
            language: transcript.language.clone(),
            detected_language: transcript.detected_language.clone(),
            speakers: json::to_column(&transcript.speakers)?,
            segments: json::to_column(&transcript.segments)?,
            created_at: datetime_to_ms(transcript.created_at),
        })
    }
}

impl TryFrom<TranscriptDbModel> for Transcript {
    type Error = Error;

    fn try_from(row: TranscriptDbModel) -> Result<Self> {
        let speakers: Vec<String> = json::parse_strict(
            &row.speakers,
            JsonContext::TranscriptField {
                transcript_id: &row.id,
                field: "speakers",
            },
        )?;
        let segments: Vec<Segment> = json::parse_strict(
            &row.segments,
            JsonContext::TranscriptField {
                transcript_id: &row.id,
                field: "segments",
            },
        )?;
        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            content_hash: row.content_hash,
            language: row.language,
            detected_language: row.detected_language,
            speakers,
            segments,
            created_at: ms_to_datetime(row.created_at),
        })
    }
}
