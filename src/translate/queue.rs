//! Request coalescing.
//! Callers enqueue small text lists; one worker task drains them FIFO, merges
//! consecutive same-language requests into a single batch translation, answers
//! each caller with its own subset, then pauses before the next drain.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::service::TranslationService;
use super::{Language, TranslateError};
use crate::config::QueueConfig;
use crate::metrics::metric_names;

struct QueuedRequest {
    texts: Vec<String>,
    target: Language,
    reply: oneshot::Sender<HashMap<String, String>>,
}

pub struct TranslationQueue {
    tx: mpsc::Sender<QueuedRequest>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TranslationQueue {
    /// Spawn the worker. Must be called inside a Tokio runtime.
    pub fn start(service: TranslationService, config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(service, config, rx, cancel.clone()));
        Self {
            tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Translate `texts` as part of the next drain. The map is keyed by
    /// source text; failed texts map to themselves.
    pub async fn enqueue(
        &self,
        texts: Vec<String>,
        target: Language,
    ) -> Result<HashMap<String, String>, TranslateError> {
        if self.cancel.is_cancelled() {
            return Err(TranslateError::QueueClosed);
        }
        if texts.is_empty() {
            return Ok(HashMap::new());
        }

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(QueuedRequest {
                texts,
                target,
                reply,
            })
            .await
            .map_err(|_| TranslateError::QueueClosed)?;
        rx.await.map_err(|_| TranslateError::QueueClosed)
    }

    /// Stop the worker after its current drain. Requests still queued are
    /// answered with `QueueClosed`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for TranslationQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    service: TranslationService,
    config: QueueConfig,
    mut rx: mpsc::Receiver<QueuedRequest>,
    cancel: CancellationToken,
) {
    let max_texts = config.max_batch_texts.max(1);
    // A request of another language that ended the previous drain.
    let mut carry: VecDeque<QueuedRequest> = VecDeque::new();

    info!(max_texts, pause_ms = config.batch_pause_ms, "translation queue started");

    loop {
        let first = match carry.pop_front() {
            Some(request) => request,
            None => tokio::select! {
                _ = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            },
        };

        let target = first.target;
        let mut text_count = first.texts.len();
        let mut batch = vec![first];
        while text_count < max_texts {
            let next = match carry.pop_front() {
                Some(request) => request,
                None => match rx.try_recv() {
                    Ok(request) => request,
                    Err(_) => break,
                },
            };
            if next.target != target {
                carry.push_front(next);
                break;
            }
            text_count += next.texts.len();
            batch.push(next);
        }

        drain(&service, batch, target).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.batch_pause()) => {}
        }
    }

    info!(dropped = carry.len(), "translation queue stopped");
}

async fn drain(service: &TranslationService, batch: Vec<QueuedRequest>, target: Language) {
    let span = service.metrics().span(metric_names::QUEUE_DRAIN);
    let unique: Vec<String> = {
        let mut seen = HashSet::new();
        batch
            .iter()
            .flat_map(|r| r.texts.iter())
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    };

    let translated = service.translate_batch(&unique, target).await;
    let lookup: HashMap<&str, &str> = unique
        .iter()
        .map(String::as_str)
        .zip(translated.iter().map(String::as_str))
        .collect();

    let callers = batch.len();
    for request in batch {
        let answer = request
            .texts
            .iter()
            .map(|t| {
                let out = lookup.get(t.as_str()).copied().unwrap_or(t.as_str());
                (t.clone(), out.to_string())
            })
            .collect();
        let _ = request.reply.send(answer);
    }

    let elapsed_us = span.finish();
    debug!(callers, texts = unique.len(), lang = %target, elapsed_us, "queue drained");
}
