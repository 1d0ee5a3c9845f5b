//! Provider call policy: circuit breaker → retry with backoff → concurrency
//! slot → per-attempt timeout → one outbound request.
//! The limiter slot is held only while a request is on the wire, never across
//! a backoff sleep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::circuit::CircuitBreaker;
use super::limiter::ConcurrencyLimiter;
use super::retry::{retry_with_backoff, RetryPolicy};
use super::{Language, TranslateError, TranslationProvider};
use crate::config::ProviderConfig;
use crate::metrics::{metric_names, Counters, MetricsRegistry};

pub struct ProviderClient {
    provider: Arc<dyn TranslationProvider>,
    retry: RetryPolicy,
    limiter: ConcurrencyLimiter,
    breaker: CircuitBreaker,
    timeout: Duration,
    max_texts_per_request: usize,
    metrics: Arc<MetricsRegistry>,
}

impl ProviderClient {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        config: &ProviderConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            provider,
            retry: config.retry,
            limiter: ConcurrencyLimiter::new(config.max_concurrency),
            breaker: CircuitBreaker::new(config.circuit_failure_threshold, config.circuit_reset()),
            timeout: config.timeout(),
            max_texts_per_request: config.max_texts_per_request.max(1),
            metrics,
        }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Translate one text, surfacing the failure. Callers decide the fallback.
    pub async fn try_translate_one(
        &self,
        text: &str,
        target: Language,
    ) -> Result<String, TranslateError> {
        let mut out = self.call(&[text.to_string()], target).await?;
        out.pop()
            .ok_or_else(|| TranslateError::MalformedResponse("empty translations array".into()))
    }

    /// Translate many texts in as few requests as the per-request cap allows.
    /// Fails as a whole if any request fails.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        target: Language,
    ) -> Result<HashMap<String, String>, TranslateError> {
        let mut out = HashMap::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_texts_per_request) {
            let translated = self.call(chunk, target).await?;
            out.extend(chunk.iter().cloned().zip(translated));
        }
        Ok(out)
    }

    /// One logical provider operation with the full call policy applied.
    async fn call(
        &self,
        texts: &[String],
        target: Language,
    ) -> Result<Vec<String>, TranslateError> {
        if !self.breaker.allow() {
            self.metrics.record_provider_failure();
            return Err(TranslateError::CircuitOpen);
        }

        let span = self.metrics.span(metric_names::PROVIDER_CALL);
        let result = retry_with_backoff(&self.retry, |attempt| async move {
            Counters::incr(&self.metrics.counters.provider_calls);
            debug!(attempt, count = texts.len(), lang = %target, "provider request");
            let translated = self
                .limiter
                .run(tokio::time::timeout(
                    self.timeout,
                    self.provider.translate(texts, target),
                ))
                .await
                .map_err(|_| TranslateError::Timeout)??;
            if translated.len() != texts.len() {
                return Err(TranslateError::MalformedResponse(format!(
                    "expected {} translations, got {}",
                    texts.len(),
                    translated.len()
                )));
            }
            Ok(translated)
        })
        .await;
        span.finish();

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                self.metrics.record_provider_success();
            }
            Err(e) => {
                warn!(error = %e, count = texts.len(), "provider call exhausted");
                self.breaker.record_failure();
                self.metrics.record_provider_failure();
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Plays back scripted responses, then echoes with a prefix.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<Vec<String>, TranslateError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Vec<String>, TranslateError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TranslationProvider for ScriptedProvider {
        async fn translate(
            &self,
            texts: &[String],
            _target: Language,
        ) -> Result<Vec<String>, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().pop_front();
            match next {
                Some(scripted) => scripted,
                None => Ok(texts.iter().map(|t| format!("pt:{t}")).collect()),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay_ms: 1,
            },
            circuit_failure_threshold: 2,
            max_texts_per_request: 2,
            ..ProviderConfig::default()
        }
    }

    fn client(provider: Arc<ScriptedProvider>, config: &ProviderConfig) -> ProviderClient {
        ProviderClient::new(provider, config, Arc::new(MetricsRegistry::new()))
    }

    #[tokio::test]
    async fn single_text_surfaces_exhausted_retries() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..4).map(|_| Err(TranslateError::Server { status: 500 })).collect(),
        ));
        let client = client(Arc::clone(&provider), &config());

        let err = client.try_translate_one("Order Confirmed", Language::Pt).await.unwrap_err();
        assert!(matches!(err, TranslateError::Server { status: 500 }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn batch_is_chunked_and_aligned() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let client = client(Arc::clone(&provider), &config());
        let texts: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();

        let out = client.translate_batch(&texts, Language::Pt).await.unwrap();

        assert_eq!(out["A"], "pt:A");
        assert_eq!(out["C"], "pt:C");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn misaligned_response_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec!["only one".into()])]));
        let client = client(provider, &config());
        let texts = vec!["A".to_string(), "B".to_string()];

        let err = client.translate_batch(&texts, Language::Pt).await.unwrap_err();
        assert!(matches!(err, TranslateError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let provider = Arc::new(ScriptedProvider {
            delay: Duration::from_millis(200),
            ..ScriptedProvider::new(Vec::new())
        });
        let mut cfg = config();
        cfg.retry.max_retries = 1;
        let mut client = client(Arc::clone(&provider), &cfg);
        client.timeout = Duration::from_millis(20);

        let err = client.try_translate_one("Hello", Language::Pt).await.unwrap_err();
        assert!(matches!(err, TranslateError::Timeout));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(TranslateError::Status { status: 403, message: "forbidden".into() }),
            Err(TranslateError::Status { status: 403, message: "forbidden".into() }),
        ]));
        let client = client(Arc::clone(&provider), &config());

        assert!(client.try_translate_one("a", Language::Pt).await.is_err());
        assert!(client.try_translate_one("b", Language::Pt).await.is_err());
        assert!(client.circuit_open());

        let err = client.try_translate_one("c", Language::Pt).await.unwrap_err();
        assert!(matches!(err, TranslateError::CircuitOpen));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
