//! JSON parsing/serialization helpers for columns that hold structured data.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub enum JsonContext<'a> {
    TranscriptField {
        transcript_id: &'a str,
        field: &'static str,
    },
    ArtifactField {
        artifact_id: &'a str,
        field: &'static str,
    },
    CacheEntry {
        key: &'a str,
    },
    QueuePayload {
        job_id: &'a str,
    },
}

impl JsonContext<'_> {
    fn entity(&self) -> &'static str {
        match self {
            Self::TranscriptField { .. } => "transcript",
            Self::ArtifactField { .. } => "artifact",
            Self::CacheEntry { .. } => "cache entry",
            Self::QueuePayload { .. } => "queue entry",
        }
    }

    fn id(&self) -> &str {
        match self {
            Self::TranscriptField { transcript_id, .. } => transcript_id,
            Self::ArtifactField { artifact_id, .. } => artifact_id,
            Self::CacheEntry { key } => key,
            Self::QueuePayload { job_id } => job_id,
        }
    }

    fn field(&self) -> &'static str {
        match self {
            Self::TranscriptField { field, .. } | Self::ArtifactField { field, .. } => field,
            Self::CacheEntry { .. } => "value",
            Self::QueuePayload { .. } => "payload",
        }
    }
}

fn warn_parse_error(raw_len: usize, error: &serde_json::Error, ctx: JsonContext<'_>, msg: &str) {
    warn!(
        entity = ctx.entity(),
        id = %ctx.id(),
        field = ctx.field(),
        raw_len,
        error = %error,
        "{msg}"
    );
}

/// Parse a required JSON column.
///
/// Malformed data is logged and surfaced as [`Error::CorruptData`] so callers
/// fail loudly instead of continuing with an empty value.
pub fn parse_strict<T: DeserializeOwned>(raw: &str, ctx: JsonContext<'_>) -> Result<T> {
    serde_json::from_str(raw).map_err(|error| {
        warn_parse_error(raw.len(), &error, ctx, "Malformed JSON column");
        Error::CorruptData {
            entity: ctx.entity().to_string(),
            id: ctx.id().to_string(),
            field: ctx.field().to_string(),
            source: error,
        }
    })
}

/// Parse an optional JSON column strictly; `None` and empty strings map to `None`.
pub fn parse_optional_strict<T: DeserializeOwned>(
    raw: Option<&str>,
    ctx: JsonContext<'_>,
) -> Result<Option<T>> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => parse_strict(raw, ctx).map(Some),
    }
}

/// Serialize a value for storage in a JSON column.
pub fn to_column<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}
