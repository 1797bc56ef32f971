//! Sync Labs lip-sync generation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{LipSyncProvider, LipSyncStatus};
use crate::utils::http_client::ensure_success;
use crate::{Error, Result};

const PROVIDER: &str = "sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl SyncConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.sync.so".to_string(),
            model: "lipsync-2".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub struct SyncLipSync {
    config: SyncConfig,
    client: Client,
}

impl SyncLipSync {
    pub fn new(config: SyncConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default, rename = "outputUrl")]
    output_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn to_status(generation: GenerationResponse) -> Result<LipSyncStatus> {
    match generation.status.as_str() {
        "COMPLETED" => generation
            .output_url
            .filter(|u| !u.is_empty())
            .map(|url| LipSyncStatus::Completed { url })
            .ok_or_else(|| {
                Error::provider(
                    PROVIDER,
                    format!("generation {} completed without an output url", generation.id),
                )
            }),
        "FAILED" | "REJECTED" | "CANCELED" => Ok(LipSyncStatus::Failed {
            reason: generation
                .error
                .unwrap_or_else(|| generation.status.to_ascii_lowercase()),
        }),
        _ => Ok(LipSyncStatus::Pending),
    }
}

#[async_trait]
impl LipSyncProvider for SyncLipSync {
    async fn submit(&self, video_url: &str, audio_url: &str) -> Result<String> {
        let response = self
            .client
            .post(self.endpoint("/v2/generate"))
            .header("x-api-key", &self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "input": [
                    {"type": "video", "url": video_url},
                    {"type": "audio", "url": audio_url},
                ],
                "options": {"sync_mode": "cut_off"},
            }))
            .send()
            .await?;
        let response = ensure_success(PROVIDER, response).await?;
        let generation: GenerationResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("malformed submit response: {e}")))?;
        debug!(generation_id = %generation.id, "Lip-sync generation submitted");
        Ok(generation.id)
    }

    async fn poll(&self, handle: &str) -> Result<LipSyncStatus> {
        let response = self
            .client
            .get(self.endpoint(&format!("/v2/generate/{handle}")))
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?;
        let response = ensure_success(PROVIDER, response).await?;
        let generation: GenerationResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("malformed status response: {e}")))?;
        to_status(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generation(raw: &str) -> GenerationResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let pending = generation(r#"{"id": "g1", "status": "PROCESSING"}"#);
        assert_eq!(to_status(pending).unwrap(), LipSyncStatus::Pending);

        let done = generation(r#"{"id": "g1", "status": "COMPLETED", "outputUrl": "https://cdn/x.mp4"}"#);
        assert_eq!(
            to_status(done).unwrap(),
            LipSyncStatus::Completed {
                url: "https://cdn/x.mp4".to_string()
            }
        );

        let failed = generation(r#"{"id": "g1", "status": "FAILED", "error": "no face detected"}"#);
        assert_eq!(
            to_status(failed).unwrap(),
            LipSyncStatus::Failed {
                reason: "no face detected".to_string()
            }
        );
    }

    #[test]
    fn test_completed_without_url_is_error() {
        let done = generation(r#"{"id": "g1", "status": "COMPLETED"}"#);
        assert!(to_status(done).is_err());
    }
}
