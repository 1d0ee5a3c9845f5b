//! Pipeline configuration.
//! Every knob has a default and can be overridden through the environment;
//! unparsable values are logged and replaced by their default.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::translate::deepl::DEFAULT_API_URL;
use crate::translate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub provider: ProviderConfig,
    /// In-memory LRU capacity (raised to at least 100).
    pub cache_max_entries: usize,
    pub queue: QueueConfig,
    pub usage: UsageConfig,
    /// SQLite database holding translation records.
    pub db_path: PathBuf,
    /// JSON file with `postTranslationRules`.
    pub rules_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub api_url: String,
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
    /// Per outbound call; a timeout counts as a retryable failure.
    pub timeout_secs: u64,
    /// Consecutive exhausted calls before the breaker opens.
    pub circuit_failure_threshold: u32,
    pub circuit_reset_secs: u64,
    /// Upper bound of texts in one provider request.
    pub max_texts_per_request: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Stop pulling callers into a batch once it holds this many texts.
    pub max_batch_texts: usize,
    pub batch_pause_ms: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Pending increments beyond this are dropped.
    pub channel_capacity: usize,
    pub flush_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            cache_max_entries: 5000,
            queue: QueueConfig::default(),
            usage: UsageConfig::default(),
            db_path: PathBuf::from("translations.db"),
            rules_path: PathBuf::from("translation-rules.json"),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            retry: RetryPolicy::default(),
            max_concurrency: 4,
            timeout_secs: 30,
            circuit_failure_threshold: 5,
            circuit_reset_secs: 60,
            max_texts_per_request: 50,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_texts: 20,
            batch_pause_ms: 1000,
            channel_capacity: 256,
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            flush_interval_ms: 300,
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn circuit_reset(&self) -> Duration {
        Duration::from_secs(self.circuit_reset_secs)
    }
}

impl QueueConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

impl PipelineConfig {
    /// Read overrides from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup` (environment-style key → value).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let p = &mut config.provider;

        p.api_key = lookup("DEEPL_API_KEY").filter(|k| !k.trim().is_empty());
        if let Some(url) = lookup("DEEPL_API_URL") {
            p.api_url = url;
        }
        parse_into(&lookup, "DEEPL_MAX_RETRIES", &mut p.retry.max_retries);
        parse_into(&lookup, "DEEPL_RETRY_BASE_DELAY_MS", &mut p.retry.base_delay_ms);
        parse_into(&lookup, "DEEPL_MAX_CONCURRENCY", &mut p.max_concurrency);
        parse_into(&lookup, "DEEPL_TIMEOUT_SECS", &mut p.timeout_secs);
        parse_into(&lookup, "TRANSLATION_CIRCUIT_THRESHOLD", &mut p.circuit_failure_threshold);
        parse_into(&lookup, "TRANSLATION_CIRCUIT_RESET_SECS", &mut p.circuit_reset_secs);

        parse_into(&lookup, "TRANSLATION_CACHE_MAX_ENTRIES", &mut config.cache_max_entries);
        parse_into(&lookup, "TRANSLATION_QUEUE_BATCH_SIZE", &mut config.queue.max_batch_texts);
        parse_into(&lookup, "TRANSLATION_QUEUE_PAUSE_MS", &mut config.queue.batch_pause_ms);

        if let Some(path) = lookup("TRANSLATION_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("TRANSLATION_RULES_PATH") {
            config.rules_path = PathBuf::from(path);
        }

        config
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, default = %slot, "invalid config value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = PipelineConfig::from_lookup(|_| None);
        assert_eq!(config.provider.retry.max_retries, 3);
        assert_eq!(config.provider.retry.base_delay_ms, 500);
        assert_eq!(config.provider.max_concurrency, 4);
        assert_eq!(config.provider.timeout(), Duration::from_secs(30));
        assert_eq!(config.cache_max_entries, 5000);
        assert_eq!(config.queue.max_batch_texts, 20);
        assert_eq!(config.queue.batch_pause(), Duration::from_secs(1));
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn environment_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("DEEPL_API_KEY", "secret-key"),
            ("DEEPL_MAX_RETRIES", "5"),
            ("DEEPL_RETRY_BASE_DELAY_MS", "100"),
            ("DEEPL_MAX_CONCURRENCY", "8"),
            ("TRANSLATION_CACHE_MAX_ENTRIES", "250"),
            ("TRANSLATION_DB_PATH", "/tmp/t.db"),
        ]));
        assert_eq!(config.provider.api_key.as_deref(), Some("secret-key"));
        assert_eq!(config.provider.retry.max_retries, 5);
        assert_eq!(config.provider.retry.base_delay_ms, 100);
        assert_eq!(config.provider.max_concurrency, 8);
        assert_eq!(config.cache_max_entries, 250);
        assert_eq!(config.db_path, PathBuf::from("/tmp/t.db"));
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("DEEPL_MAX_RETRIES", "three"),
            ("DEEPL_MAX_CONCURRENCY", "-1"),
            ("DEEPL_API_KEY", "   "),
        ]));
        assert_eq!(config.provider.retry.max_retries, 3);
        assert_eq!(config.provider.max_concurrency, 4);
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn api_key_is_never_serialized() {
        let mut config = PipelineConfig::default();
        config.provider.api_key = Some("do-not-leak".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("do-not-leak"));
    }
}
