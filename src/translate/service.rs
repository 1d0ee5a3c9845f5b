//! Translation façade.
//! Resolution order for one text: same-language/blank passthrough → exact
//! override rule → LRU → in-flight request for the same key → store →
//! provider. Nothing here returns an error for a failed translation; the
//! original text comes back instead.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::cache::{CacheKey, TranslationCache};
use super::client::ProviderClient;
use super::deepl::DeepLClient;
use super::glossary::{exact_rule_match, PostProcessor};
use super::rules::{JsonFileRules, RuleSet, RuleSource};
use super::sqlite_store::SqliteStore;
use super::store::{StoreError, StoreStats, TranslationRecord, TranslationStore};
use super::usage::UsageRecorder;
use super::{Language, TranslateError, TranslationProvider, SOURCE_LANGUAGE};
use crate::config::PipelineConfig;
use crate::metrics::{metric_names, Counters, MetricsRegistry, TranslationStats};

type SharedTranslation = Shared<BoxFuture<'static, String>>;

/// Cheaply cloneable handle; clones share caches, store and provider.
#[derive(Clone)]
pub struct TranslationService {
    inner: Arc<Inner>,
}

struct Inner {
    client: ProviderClient,
    store: Arc<dyn TranslationStore>,
    rules: Arc<dyn RuleSource>,
    post: PostProcessor,
    cache: TranslationCache,
    pending: Mutex<HashMap<CacheKey, SharedTranslation>>,
    usage: UsageRecorder,
    metrics: Arc<MetricsRegistry>,
}

/// Texts of a batch still needing store/provider work.
struct Unresolved {
    /// Unique texts, first-seen order.
    texts: Vec<String>,
    positions: HashMap<String, Vec<usize>>,
}

impl Unresolved {
    fn fill(&self, results: &mut [String], resolved: &HashMap<String, String>) {
        for (text, translated) in resolved {
            if let Some(indices) = self.positions.get(text) {
                for &i in indices {
                    results[i] = translated.clone();
                }
            }
        }
    }
}

impl TranslationService {
    /// Assemble the pipeline from its parts. Must be called inside a Tokio
    /// runtime (the usage writer is spawned here).
    pub fn new(
        config: &PipelineConfig,
        provider: Arc<dyn TranslationProvider>,
        store: Arc<dyn TranslationStore>,
        rules: Arc<dyn RuleSource>,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let client = ProviderClient::new(provider, &config.provider, Arc::clone(&metrics));
        let usage = UsageRecorder::spawn(Arc::clone(&store), &config.usage);
        let cache = TranslationCache::new(config.cache_max_entries);

        info!(
            model = client.model(),
            cache_capacity = cache.capacity(),
            max_concurrency = config.provider.max_concurrency,
            "translation service ready"
        );

        Self {
            inner: Arc::new(Inner {
                client,
                store,
                rules,
                post: PostProcessor::new(),
                cache,
                pending: Mutex::new(HashMap::new()),
                usage,
                metrics,
            }),
        }
    }

    /// Production wiring: DeepL provider, SQLite store, JSON rules file.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, TranslateError> {
        let provider = DeepLClient::new(&config.provider)?;
        let store = SqliteStore::open(&config.db_path)?;
        let rules = JsonFileRules::new(config.rules_path.clone());
        Ok(Self::new(
            config,
            Arc::new(provider),
            Arc::new(store),
            Arc::new(rules),
        ))
    }

    /// Translate one text. Never fails: on any error the original is returned.
    pub async fn translate_text(&self, text: &str, target: Language) -> String {
        let span = self.inner.metrics.span(metric_names::TRANSLATE_TEXT);
        let out = self.resolve_text(text, target).await;
        span.finish();
        out
    }

    async fn resolve_text(&self, text: &str, target: Language) -> String {
        let inner = &self.inner;
        Counters::incr(&inner.metrics.counters.total_requests);

        if target == SOURCE_LANGUAGE || text.trim().is_empty() {
            return text.to_string();
        }

        let rules = inner.rules.load();
        if let Some(hit) = exact_rule_match(text, &rules) {
            Counters::incr(&inner.metrics.counters.rule_hits);
            debug!(lang = %target, "exact override rule hit");
            return hit;
        }

        let key = TranslationCache::compute_key(target, text);
        if let Some(hit) = inner.cache.get(&key) {
            Counters::incr(&inner.metrics.counters.cache_hits);
            return hit;
        }

        let shared = {
            let mut pending = inner.pending.lock();
            if let Some(existing) = pending.get(&key).cloned() {
                Counters::incr(&inner.metrics.counters.pending_joins);
                existing
            } else {
                let (tx, rx) = oneshot::channel();
                let fallback = text.to_string();
                let shared = rx.map(move |r| r.unwrap_or(fallback)).boxed().shared();
                pending.insert(key, shared.clone());

                // Registered before the task starts, so the guard always
                // finds (and removes) this entry.
                let task_inner = Arc::clone(inner);
                let source = text.to_string();
                tokio::spawn(async move {
                    let _guard = PendingGuard {
                        inner: Arc::clone(&task_inner),
                        key,
                    };
                    let translated = task_inner
                        .resolve_uncached(key, &source, target, &rules)
                        .await;
                    let _ = tx.send(translated);
                });
                shared
            }
        };
        shared.await
    }

    /// Translate many texts; output is positionally aligned with `texts`.
    pub async fn translate_batch(&self, texts: &[String], target: Language) -> Vec<String> {
        let span = self.inner.metrics.span(metric_names::TRANSLATE_BATCH);
        let rules = self.inner.rules.load();
        let (mut results, unresolved) = self.inner.prepass(texts, target, &rules);

        if !unresolved.texts.is_empty() {
            let (hits, missing) = self.inner.lookup_store(&unresolved.texts, target).await;
            unresolved.fill(&mut results, &hits);
            let translated = self.inner.translate_missing(missing, target, &rules).await;
            unresolved.fill(&mut results, &translated);
        }

        span.finish();
        results
    }

    /// Like `translate_batch`, but returns at once with rule/cache hits filled
    /// and the rest patched in by a background task.
    pub fn translate_batch_progressive(&self, texts: &[String], target: Language) -> ProgressiveBatch {
        let rules = self.inner.rules.load();
        let (results, unresolved) = self.inner.prepass(texts, target, &rules);
        let results = Arc::new(RwLock::new(results));

        if unresolved.texts.is_empty() {
            let (_done_tx, done_rx) = watch::channel(true);
            return ProgressiveBatch {
                results,
                done: done_rx,
            };
        }

        let (done_tx, done_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let buffer = Arc::clone(&results);
        tokio::spawn(async move {
            let (hits, missing) = inner.lookup_store(&unresolved.texts, target).await;
            unresolved.fill(&mut buffer.write(), &hits);

            let translated = inner.translate_missing(missing, target, &rules).await;
            unresolved.fill(&mut buffer.write(), &translated);

            let _ = done_tx.send(true);
            debug!(count = unresolved.texts.len(), lang = %target, "progressive batch complete");
        });

        ProgressiveBatch {
            results,
            done: done_rx,
        }
    }

    /// Drop every in-memory translation. The store is untouched.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        info!("translation cache cleared");
    }

    pub fn stats(&self) -> TranslationStats {
        self.inner
            .metrics
            .snapshot(self.inner.client.circuit_open(), self.inner.cache.len())
    }

    pub async fn store_stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.store.stats().await
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.inner.metrics
    }

    /// Wait for queued usage-counter increments to reach the store.
    pub async fn flush_usage(&self) {
        self.inner.usage.flush().await;
    }
}

impl Inner {
    /// Store, then provider, for a text that missed rules and cache.
    async fn resolve_uncached(
        &self,
        key: CacheKey,
        text: &str,
        target: Language,
        rules: &RuleSet,
    ) -> String {
        match self.store.find_one(text, target).await {
            Ok(Some(record)) if record.is_valid() => {
                Counters::incr(&self.metrics.counters.store_hits);
                debug!(lang = %target, "store hit");
                self.cache.insert(key, record.translated_text.clone());
                self.usage.touch(text, target);
                return record.translated_text;
            }
            Ok(Some(_)) => debug!(lang = %target, "ignoring stored translation equal to source"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, lang = %target, "store lookup failed"),
        }

        let raw = match self.client.try_translate_one(text, target).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, lang = %target, "translation failed, keeping original text");
                Counters::incr(&self.metrics.counters.fallbacks);
                return text.to_string();
            }
        };

        let translated = self.post.apply(&raw, text, target, rules);
        if translated != text {
            let record = TranslationRecord::new(text, target, translated.as_str(), self.client.model());
            match self.store.insert_one(record).await {
                Ok(()) => {}
                Err(StoreError::DuplicateKey { .. }) => {
                    debug!(lang = %target, "translation already stored by a concurrent writer");
                }
                Err(e) => warn!(error = %e, lang = %target, "failed to persist translation"),
            }
            self.usage.touch(text, target);
        }
        self.cache.insert(key, translated.clone());
        translated
    }

    /// Passthrough, exact rules and cache. Returns the result buffer (unresolved
    /// positions hold their original text) and what is left to resolve.
    fn prepass(&self, texts: &[String], target: Language, rules: &RuleSet) -> (Vec<String>, Unresolved) {
        let mut results = texts.to_vec();
        let mut unresolved = Unresolved {
            texts: Vec::new(),
            positions: HashMap::new(),
        };
        if target == SOURCE_LANGUAGE {
            return (results, unresolved);
        }

        for (i, text) in texts.iter().enumerate() {
            Counters::incr(&self.metrics.counters.total_requests);
            if text.trim().is_empty() {
                continue;
            }
            if let Some(hit) = exact_rule_match(text, rules) {
                Counters::incr(&self.metrics.counters.rule_hits);
                results[i] = hit;
                continue;
            }
            if let Some(hit) = self.cache.get(&TranslationCache::compute_key(target, text)) {
                Counters::incr(&self.metrics.counters.cache_hits);
                results[i] = hit;
                continue;
            }
            let positions = unresolved.positions.entry(text.clone()).or_default();
            if positions.is_empty() {
                unresolved.texts.push(text.clone());
            }
            positions.push(i);
        }
        (results, unresolved)
    }

    /// One bulk store lookup. Valid hits are cached and touched; the rest are
    /// returned as missing, in input order.
    async fn lookup_store(
        &self,
        texts: &[String],
        target: Language,
    ) -> (HashMap<String, String>, Vec<String>) {
        let records = match self.store.find_many(texts, target).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, count = texts.len(), lang = %target, "store batch lookup failed");
                Vec::new()
            }
        };

        let mut hits = HashMap::with_capacity(records.len());
        for record in records.into_iter().filter(TranslationRecord::is_valid) {
            Counters::incr(&self.metrics.counters.store_hits);
            self.cache.insert(
                TranslationCache::compute_key(target, &record.source_text),
                record.translated_text.clone(),
            );
            self.usage.touch(&record.source_text, target);
            hits.insert(record.source_text, record.translated_text);
        }

        let missing = texts
            .iter()
            .filter(|t| !hits.contains_key(*t))
            .cloned()
            .collect();
        (hits, missing)
    }

    /// Provider round for texts not in the store. A failed bulk call falls back
    /// to one call per text; texts that still fail are left out of the result.
    async fn translate_missing(
        &self,
        missing: Vec<String>,
        target: Language,
        rules: &RuleSet,
    ) -> HashMap<String, String> {
        if missing.is_empty() {
            return HashMap::new();
        }

        let raw = match self.client.translate_batch(&missing, target).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, count = missing.len(), lang = %target, "batch translation failed, retrying per text");
                let mut raw = HashMap::with_capacity(missing.len());
                for text in &missing {
                    match self.client.try_translate_one(text, target).await {
                        Ok(translated) => {
                            raw.insert(text.clone(), translated);
                        }
                        Err(e) => {
                            warn!(error = %e, lang = %target, "translation failed, keeping original text");
                            Counters::incr(&self.metrics.counters.fallbacks);
                        }
                    }
                }
                raw
            }
        };

        let mut translated = HashMap::with_capacity(raw.len());
        let mut records = Vec::with_capacity(raw.len());
        for text in &missing {
            let Some(out) = raw.get(text) else { continue };
            let out = self.post.apply(out, text, target, rules);
            self.cache
                .insert(TranslationCache::compute_key(target, text), out.clone());
            if out != *text {
                records.push(TranslationRecord::new(text.as_str(), target, out.as_str(), self.client.model()));
                self.usage.touch(text, target);
            }
            translated.insert(text.clone(), out);
        }

        if !records.is_empty() {
            match self.store.insert_many(records).await {
                Ok(inserted) => debug!(inserted, lang = %target, "batch translations persisted"),
                Err(e) => warn!(error = %e, lang = %target, "failed to persist batch translations"),
            }
        }
        translated
    }
}

/// Removes a pending entry when its resolution task ends, however it ends.
struct PendingGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.key);
    }
}

/// Handle to a batch being completed in the background.
#[derive(Clone)]
pub struct ProgressiveBatch {
    results: Arc<RwLock<Vec<String>>>,
    done: watch::Receiver<bool>,
}

impl ProgressiveBatch {
    /// Current state of the results; unresolved positions hold the original.
    pub fn snapshot(&self) -> Vec<String> {
        self.results.read().clone()
    }

    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait for the background task, then return the final results.
    pub async fn wait(&self) -> Vec<String> {
        let mut done = self.done.clone();
        // A dropped sender (task panicked) still leaves a usable snapshot.
        let _ = done.wait_for(|complete| *complete).await;
        self.snapshot()
    }
}
