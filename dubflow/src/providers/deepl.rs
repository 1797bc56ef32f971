//! DeepL translation.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::Translator;
use crate::utils::http_client::ensure_success;
use crate::{Error, Result};

const PROVIDER: &str = "deepl";

#[derive(Debug, Clone)]
pub struct DeepLConfig {
    pub api_key: String,
    pub base_url: String,
}

impl DeepLConfig {
    /// Free-tier keys end in `:fx` and use a separate host.
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let base_url = if api_key.ends_with(":fx") {
            "https://api-free.deepl.com"
        } else {
            "https://api.deepl.com"
        };
        Self {
            api_key,
            base_url: base_url.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub struct DeepLTranslator {
    config: DeepLConfig,
    client: Client,
}

impl DeepLTranslator {
    pub fn new(config: DeepLConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

/// DeepL expects upper-case codes and only the primary subtag for source languages.
fn deepl_code(language: &str, is_source: bool) -> String {
    let code = language.replace('_', "-").to_ascii_uppercase();
    if is_source {
        code.split('-').next().unwrap_or_default().to_string()
    } else {
        code
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    async fn translate(&self, text: &str, source: Option<&str>, target: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }

        let mut body = json!({
            "text": [text],
            "target_lang": deepl_code(target, false),
        });
        if let Some(source) = source {
            body["source_lang"] = json!(deepl_code(source, true));
        }

        let response = self
            .client
            .post(format!(
                "{}/v2/translate",
                self.config.base_url.trim_end_matches('/')
            ))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("DeepL-Auth-Key {}", self.config.api_key),
            )
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(PROVIDER, response).await?;
        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(PROVIDER, format!("malformed translation: {e}")))?;

        parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text)
            .ok_or_else(|| Error::provider(PROVIDER, "response contained no translation"))
    }
}
