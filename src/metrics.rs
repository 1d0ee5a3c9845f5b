//! Pipeline counters and latency histograms.
//! Counters are lock-free atomics; histograms keep the last 1024 samples per
//! metric and report p50/p95/p99.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Monotonic pipeline counters.
#[derive(Default)]
pub struct Counters {
    pub total_requests: AtomicU64,
    pub rule_hits: AtomicU64,
    pub cache_hits: AtomicU64,
    pub pending_joins: AtomicU64,
    pub store_hits: AtomicU64,
    pub provider_calls: AtomicU64,
    pub provider_failures: AtomicU64,
    pub fallbacks: AtomicU64,
    pub last_success_at: AtomicI64,
    pub last_failure_at: AtomicI64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

pub struct MetricsRegistry {
    pub counters: Counters,
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            histograms: Mutex::new(HashMap::new()),
            ring_capacity: 1024,
        }
    }

    /// Record a sample (in microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn record_provider_success(&self) {
        self.counters
            .last_success_at
            .store(crate::now_unix(), Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        Counters::incr(&self.counters.provider_failures);
        self.counters
            .last_failure_at
            .store(crate::now_unix(), Ordering::Relaxed);
    }

    /// Percentile summary for every recorded metric.
    pub fn latency_summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_us: ring.percentile(50.0),
                        p95_us: ring.percentile(95.0),
                        p99_us: ring.percentile(99.0),
                        count: ring.count,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

/// Point-in-time view of the pipeline for admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationStats {
    pub total_requests: u64,
    pub rule_hits: u64,
    pub cache_hits: u64,
    pub pending_joins: u64,
    pub store_hits: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
    pub fallbacks: u64,
    /// Unix seconds, 0 if never.
    pub last_success_at: i64,
    pub last_failure_at: i64,
    pub circuit_open: bool,
    pub cache_entries: usize,
    pub latency: HashMap<String, MetricSummary>,
}

impl MetricsRegistry {
    pub fn snapshot(&self, circuit_open: bool, cache_entries: usize) -> TranslationStats {
        let c = &self.counters;
        TranslationStats {
            total_requests: c.total_requests.load(Ordering::Relaxed),
            rule_hits: c.rule_hits.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            pending_joins: c.pending_joins.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            provider_calls: c.provider_calls.load(Ordering::Relaxed),
            provider_failures: c.provider_failures.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            last_success_at: c.last_success_at.load(Ordering::Relaxed),
            last_failure_at: c.last_failure_at.load(Ordering::Relaxed),
            circuit_open,
            cache_entries,
            latency: self.latency_summary(),
        }
    }
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    pub const PROVIDER_CALL: &str = "t_provider_call";
    pub const TRANSLATE_TEXT: &str = "t_translate_text";
    pub const TRANSLATE_BATCH: &str = "t_translate_batch";
    pub const QUEUE_DRAIN: &str = "t_queue_drain";
}
