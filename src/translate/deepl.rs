//! DeepL API client.
//! One POST per call with every text in the `text` array; the response's
//! `translations` are positionally aligned with the request. Pooled connections
//! via reqwest. Retries live in `client::ProviderClient`, not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Language, TranslateError, TranslationProvider};
use crate::config::ProviderConfig;

pub const DEFAULT_API_URL: &str = "https://api-free.deepl.com/v2/translate";

/// DeepL `/v2/translate` client.
pub struct DeepLClient {
    http: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl DeepLClient {
    /// Build a client from provider settings. Fails without a well-formed key.
    pub fn new(config: &ProviderConfig) -> Result<Self, TranslateError> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(TranslateError::MissingApiKey)?;
        if !is_valid_api_key(api_key) {
            return Err(TranslateError::InvalidApiKey);
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_concurrency.max(1))
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TranslateError::Http(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            api_url: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl TranslationProvider for DeepLClient {
    async fn translate(
        &self,
        texts: &[String],
        target: Language,
    ) -> Result<Vec<String>, TranslateError> {
        let body = TranslateRequestBody {
            text: texts,
            target_lang: target.provider_code(),
        };

        let response = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            let parsed: TranslateResponseBody = response
                .json()
                .await
                .map_err(|e| TranslateError::MalformedResponse(e.to_string()))?;
            debug!(count = parsed.translations.len(), "deepl batch translated");
            return Ok(parsed.translations.into_iter().map(|t| t.text).collect());
        }

        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(TranslateError::RateLimited { retry_after_ms });
        }

        if status.is_server_error() {
            return Err(TranslateError::Server {
                status: status.as_u16(),
            });
        }

        let body_text = response.text().await.unwrap_or_default();
        Err(TranslateError::Status {
            status: status.as_u16(),
            message: error_message(&body_text, status.canonical_reason().unwrap_or("")),
        })
    }

    fn model(&self) -> &str {
        "deepl"
    }
}

fn map_transport_error(e: reqwest::Error) -> TranslateError {
    if e.is_timeout() {
        TranslateError::Timeout
    } else {
        TranslateError::Http(e.to_string())
    }
}

/// `Retry-After` in whole seconds, as milliseconds.
fn parse_retry_after(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

/// Keys are 24-128 chars of alphanumerics, '-' and ':' (e.g. `uuid:fx`).
pub fn is_valid_api_key(key: &str) -> bool {
    let key = key.trim();
    (24..=128).contains(&key.len())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ':')
}

/// Prefer the JSON `message` field of an error body, else the HTTP reason.
fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                fallback.to_string()
            } else {
                body.chars().take(200).collect()
            }
        })
}

// --- Wire types ---

#[derive(Serialize)]
struct TranslateRequestBody<'a> {
    text: &'a [String],
    target_lang: &'static str,
}

#[derive(Deserialize)]
struct TranslateResponseBody {
    translations: Vec<TranslationItem>,
}

#[derive(Deserialize)]
struct TranslationItem {
    text: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}
