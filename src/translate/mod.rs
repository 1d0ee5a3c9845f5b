//! Translation pipeline: LRU (L1) → persistent store (L2) → external provider.
//! Concurrent identical requests share one in-flight resolution; coalesced
//! callers go through the queue; provider calls are retried, rate-capped and
//! guarded by a circuit breaker.

pub mod cache;
pub mod circuit;
pub mod client;
pub mod deepl;
pub mod glossary;
pub mod limiter;
pub mod queue;
pub mod retry;
pub mod rules;
pub mod service;
pub mod sqlite_store;
pub mod store;
pub mod usage;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use service::{ProgressiveBatch, TranslationService};
pub use store::{StoreError, TranslationRecord, TranslationStore};

/// Language every source text is written in.
pub const SOURCE_LANGUAGE: Language = Language::En;

/// Internal language codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Pt,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Pt => "pt",
        }
    }

    /// Target code understood by the provider. `pt` is European Portuguese.
    pub fn provider_code(self) -> &'static str {
        match self {
            Language::En => "EN-GB",
            Language::Pt => "PT-PT",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "pt" | "pt-pt" => Ok(Language::Pt),
            other => Err(TranslateError::UnsupportedLanguage(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("translation request timed out")]
    Timeout,

    #[error("rate limited by provider")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider server error: HTTP {status}")]
    Server { status: u16 },

    #[error("provider rejected request: HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("translation API key not configured")]
    MissingApiKey,

    #[error("translation API key has an invalid format")]
    InvalidApiKey,

    #[error("provider circuit breaker is open")]
    CircuitOpen,

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("translation queue is closed")]
    QueueClosed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl TranslateError {
    /// Transport failures, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TranslateError::Http(_)
                | TranslateError::Timeout
                | TranslateError::RateLimited { .. }
                | TranslateError::Server { .. }
        )
    }
}

/// One outbound call to a translation backend.
///
/// The returned vector is positionally aligned with `texts`.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        texts: &[String],
        target: Language,
    ) -> Result<Vec<String>, TranslateError>;

    /// Engine tag stored on persisted records.
    fn model(&self) -> &str;
}
