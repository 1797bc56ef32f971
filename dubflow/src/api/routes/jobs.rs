//! Dubbing job routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/jobs` | Upload a video (multipart) and queue it for dubbing |
//! | GET | `/api/jobs/{id}` | Job status, progress, artifacts and the ready video URL |
//! | GET | `/api/jobs/{id}/transcripts/{language}` | Latest transcript (`original` for the source) |
//! | PUT | `/api/jobs/{id}/transcripts/{language}` | Store an edited transcript version |
//! | GET | `/api/jobs/{id}/voices` | Speaker to voice mappings |
//! | PUT | `/api/jobs/{id}/voices/{speaker_id}` | Bind a speaker to a voice |
//! | POST | `/api/jobs/{id}/redub` | Run a finished job again |

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain::{Job, Segment, Transcript, VoiceMapping};
use crate::services::{JobStatusView, Submission, VoiceMappingInput};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/{id}", get(get_job))
        .route(
            "/{id}/transcripts/{language}",
            get(get_transcript).put(put_transcript),
        )
        .route("/{id}/voices", get(list_voices))
        .route("/{id}/voices/{speaker_id}", put(put_voice))
        .route("/{id}/redub", post(redub_job))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub cached: bool,
    pub status_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptRequest {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceMappingRequest {
    pub voice_id: String,
    #[serde(default)]
    pub speaker_name: Option<String>,
    #[serde(default)]
    pub voice_name: Option<String>,
}

/// Accepts `file`, `target_language` and an optional `lipsync` flag.
///
/// Answers 202 for a newly queued job and 200 when an identical job already
/// completed.
async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut target_language = None;
    let mut lipsync = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, bytes.to_vec()));
            }
            "target_language" => {
                target_language = Some(field.text().await.map_err(multipart_error)?);
            }
            "lipsync" => {
                let value = field.text().await.map_err(multipart_error)?;
                lipsync = parse_flag(&value)
                    .ok_or_else(|| ApiError::validation(format!("invalid lipsync value '{value}'")))?;
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::validation("missing 'file' field"))?;
    let outcome = state
        .dubbing
        .submit(Submission {
            bytes,
            filename,
            target_language: target_language.unwrap_or_default(),
            lipsync,
        })
        .await?;

    let status = if outcome.cached {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(SubmitResponse {
            status_url: format!("/api/jobs/{}", outcome.job_id),
            job_id: outcome.job_id,
            cached: outcome.cached,
        }),
    ))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusView>> {
    Ok(Json(state.dubbing.job_status(&id).await?))
}

async fn get_transcript(
    State(state): State<AppState>,
    Path((id, language)): Path<(String, String)>,
) -> ApiResult<Json<Transcript>> {
    Ok(Json(state.dubbing.get_transcript(&id, &language).await?))
}

async fn put_transcript(
    State(state): State<AppState>,
    Path((id, language)): Path<(String, String)>,
    Json(request): Json<TranscriptRequest>,
) -> ApiResult<Json<Transcript>> {
    let transcript = state
        .dubbing
        .save_transcript(&id, &language, request.segments)
        .await?;
    Ok(Json(transcript))
}

async fn list_voices(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<VoiceMapping>>> {
    Ok(Json(state.dubbing.list_voice_mappings(&id).await?))
}

async fn put_voice(
    State(state): State<AppState>,
    Path((id, speaker_id)): Path<(String, String)>,
    Json(request): Json<VoiceMappingRequest>,
) -> ApiResult<Json<VoiceMapping>> {
    let mapping = state
        .dubbing
        .upsert_voice_mapping(
            &id,
            &speaker_id,
            VoiceMappingInput {
                voice_id: request.voice_id,
                speaker_name: request.speaker_name,
                voice_name: request.voice_name,
            },
        )
        .await?;
    Ok(Json(mapping))
}

async fn redub_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.dubbing.redub(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    let status = e.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(e.body_text())
    } else {
        ApiError::bad_request(e.body_text())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Some(false),
        "1" | "true" | "yes" | "on" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("true"), Some(true));
        assert_eq!(parse_flag(" ON "), Some(true));
        assert_eq!(parse_flag(""), Some(false));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("sometimes"), None);
    }
}
