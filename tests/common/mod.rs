//! In-process provider and store doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lexicache::config::{PipelineConfig, QueueConfig, UsageConfig};
use lexicache::translate::retry::RetryPolicy;
use lexicache::translate::rules::{RuleSet, StaticRules};
use lexicache::translate::store::{StoreError, StoreStats, TranslationRecord, TranslationStore};
use lexicache::{Language, TranslateError, TranslationProvider, TranslationService};
use parking_lot::Mutex;

/// Answers `pt:<text>` unless told to fail.
#[derive(Default)]
pub struct FakeProvider {
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
    /// Played back one per call before anything else.
    scripted_failures: Mutex<VecDeque<TranslateError>>,
    /// When set, every call fails with the error it builds.
    always_fail: Mutex<Option<fn() -> TranslateError>>,
    /// A request containing any of these texts is rejected.
    poison: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let provider = Self::default();
        *provider.delay.lock() = delay;
        Arc::new(provider)
    }

    pub fn fail_next(&self, error: TranslateError) {
        self.scripted_failures.lock().push_back(error);
    }

    pub fn fail_always(&self, make: fn() -> TranslateError) {
        *self.always_fail.lock() = Some(make);
    }

    pub fn recover(&self) {
        *self.always_fail.lock() = None;
    }

    pub fn poison(&self, text: &str) {
        self.poison.lock().insert(text.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TranslationProvider for FakeProvider {
    async fn translate(
        &self,
        texts: &[String],
        _target: Language,
    ) -> Result<Vec<String>, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(texts.to_vec());

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.scripted_failures.lock().pop_front() {
            return Err(error);
        }
        if let Some(make) = *self.always_fail.lock() {
            return Err(make());
        }
        if texts.iter().any(|t| self.poison.lock().contains(t)) {
            return Err(TranslateError::Status {
                status: 400,
                message: "rejected".into(),
            });
        }
        Ok(texts.iter().map(|t| format!("pt:{t}")).collect())
    }

    fn model(&self) -> &str {
        "fake"
    }
}

/// HashMap-backed store with the same conflict semantics as SQLite.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, Language), TranslationRecord>>,
    broken: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every operation fails from now on.
    pub fn break_down(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn seed(&self, source: &str, target: Language, translated: &str) {
        let record = TranslationRecord::new(source, target, translated, "seed");
        self.records
            .lock()
            .insert((source.to_string(), target), record);
    }

    pub fn get(&self, source: &str, target: Language) -> Option<TranslationRecord> {
        self.records
            .lock()
            .get(&(source.to_string(), target))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.broken.load(Ordering::SeqCst) {
            Err(StoreError::Task("store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TranslationStore for MemoryStore {
    async fn find_one(
        &self,
        source_text: &str,
        target: Language,
    ) -> Result<Option<TranslationRecord>, StoreError> {
        self.check()?;
        Ok(self.get(source_text, target))
    }

    async fn find_many(
        &self,
        source_texts: &[String],
        target: Language,
    ) -> Result<Vec<TranslationRecord>, StoreError> {
        self.check()?;
        let records = self.records.lock();
        Ok(source_texts
            .iter()
            .filter_map(|t| records.get(&(t.clone(), target)).cloned())
            .collect())
    }

    async fn insert_one(&self, record: TranslationRecord) -> Result<(), StoreError> {
        self.check()?;
        let mut records = self.records.lock();
        let key = (record.source_text.clone(), record.target_lang);
        if records.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                source_text: record.source_text,
                target_lang: record.target_lang,
            });
        }
        records.insert(key, record);
        Ok(())
    }

    async fn insert_many(&self, batch: Vec<TranslationRecord>) -> Result<usize, StoreError> {
        self.check()?;
        let mut records = self.records.lock();
        let mut inserted = 0;
        for record in batch {
            let key = (record.source_text.clone(), record.target_lang);
            if let std::collections::hash_map::Entry::Vacant(slot) = records.entry(key) {
                slot.insert(record);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn increment_usage(&self, source_text: &str, target: Language) -> Result<(), StoreError> {
        self.check()?;
        if let Some(record) = self.records.lock().get_mut(&(source_text.to_string(), target)) {
            record.usage_count += 1;
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.check()?;
        let mut stats = StoreStats::default();
        for (_, target) in self.records.lock().keys() {
            stats.total += 1;
            *stats.by_language.entry(target.to_string()).or_default() += 1;
        }
        Ok(stats)
    }
}

/// Fast retries and short pauses so tests finish quickly.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.provider.retry = RetryPolicy {
        max_retries: 3,
        base_delay_ms: 1,
    };
    config.queue = QueueConfig {
        max_batch_texts: 20,
        batch_pause_ms: 10,
        channel_capacity: 64,
    };
    config.usage = UsageConfig {
        channel_capacity: 64,
        flush_interval_ms: 5,
    };
    config
}

pub fn rules(pairs: &[(&str, &str)]) -> Arc<StaticRules> {
    Arc::new(StaticRules::new(RuleSet::from_pairs(
        pairs.iter().map(|(p, r)| (p.to_string(), r.to_string())),
    )))
}

pub fn service_with(
    config: &PipelineConfig,
    provider: &Arc<FakeProvider>,
    store: &Arc<MemoryStore>,
    rules: Arc<StaticRules>,
) -> TranslationService {
    TranslationService::new(config, provider.clone(), store.clone(), rules)
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
