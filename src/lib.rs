//! Lexicache: multi-tier translation cache and batching pipeline.
//! LRU → SQLite store → DeepL, with request coalescing, override rules and a
//! European-Portuguese glossary.

pub mod config;
pub mod metrics;
pub mod translate;

pub use config::PipelineConfig;
pub use metrics::TranslationStats;
pub use translate::queue::TranslationQueue;
pub use translate::{
    Language, ProgressiveBatch, TranslateError, TranslationProvider, TranslationService,
};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `lexicache=info` filter;
/// `LEXICACHE_LOG_FORMAT=json` switches to JSON lines. Safe to call twice.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("lexicache=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let json = std::env::var("LEXICACHE_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_ok() {
        tracing::info!("lexicache tracing initialized");
    }
}

/// Current time as Unix timestamp (seconds).
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
