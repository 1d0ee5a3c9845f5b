//! Durable translation records (L2) behind a narrow async contract.
//! `(source_text, target_lang)` is unique; the pipeline only inserts and bumps
//! usage counters, never deletes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::Language;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub id: Uuid,
    pub source_text: String,
    pub target_lang: Language,
    pub translated_text: String,
    /// Engine that produced the translation, e.g. "deepl".
    pub model: String,
    pub usage_count: i64,
    /// Unix seconds.
    pub last_used: i64,
    pub created_at: i64,
}

impl TranslationRecord {
    /// A fresh record for a just-produced translation.
    pub fn new(
        source_text: impl Into<String>,
        target_lang: Language,
        translated_text: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let now = crate::now_unix();
        Self {
            id: Uuid::new_v4(),
            source_text: source_text.into(),
            target_lang,
            translated_text: translated_text.into(),
            model: model.into(),
            usage_count: 0,
            last_used: now,
            created_at: now,
        }
    }

    /// A record whose "translation" equals its source is a leftover from a
    /// failed run and must not be served.
    pub fn is_valid(&self) -> bool {
        !self.translated_text.is_empty() && self.translated_text != self.source_text
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("translation already stored for ({target_lang}, {source_text:?})")]
    DuplicateKey {
        source_text: String,
        target_lang: Language,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Record counts for admin dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub by_language: BTreeMap<String, u64>,
}

#[async_trait]
pub trait TranslationStore: Send + Sync {
    async fn find_one(
        &self,
        source_text: &str,
        target: Language,
    ) -> Result<Option<TranslationRecord>, StoreError>;

    /// Records for any of `source_texts` in `target`. Missing texts are absent.
    async fn find_many(
        &self,
        source_texts: &[String],
        target: Language,
    ) -> Result<Vec<TranslationRecord>, StoreError>;

    /// Fails with `StoreError::DuplicateKey` if the pair already exists.
    async fn insert_one(&self, record: TranslationRecord) -> Result<(), StoreError>;

    /// Inserts, silently skipping pairs that already exist. Returns inserted count.
    async fn insert_many(&self, records: Vec<TranslationRecord>) -> Result<usize, StoreError>;

    /// Bumps `usage_count` and `last_used`. An absent record is not an error.
    async fn increment_usage(&self, source_text: &str, target: Language) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
