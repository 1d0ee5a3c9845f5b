//! Usage-counter bumps, batched off the request path.
//! Increments go through a bounded channel to one background task that writes
//! them every flush interval. A full channel drops the increment.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::store::TranslationStore;
use super::Language;
use crate::config::UsageConfig;

enum UsageMsg {
    Touch { source_text: String, target: Language },
    Flush(oneshot::Sender<()>),
}

/// Handle to the background usage writer. Cloning shares the same writer.
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<UsageMsg>,
}

impl UsageRecorder {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn TranslationStore>, config: &UsageConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let interval = Duration::from_millis(config.flush_interval_ms.max(1));
        tokio::spawn(flush_loop(rx, store, interval));
        Self { tx }
    }

    /// Queue one increment. Never blocks.
    pub fn touch(&self, source_text: &str, target: Language) {
        let msg = UsageMsg::Touch {
            source_text: source_text.to_string(),
            target,
        };
        match self.tx.try_send(msg) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(lang = %target, "usage channel full, dropping increment");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("usage writer stopped, dropping increment");
            }
        }
    }

    /// Wait until every increment queued before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(UsageMsg::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn flush_loop(
    mut rx: mpsc::Receiver<UsageMsg>,
    store: Arc<dyn TranslationStore>,
    interval: Duration,
) {
    let mut buffer: Vec<(String, Language)> = Vec::with_capacity(32);
    let mut waiters: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            msg = rx.recv() => {
                match msg {
                    Some(msg) => absorb(msg, &mut buffer, &mut waiters),
                    None => {
                        flush_batch(store.as_ref(), &mut buffer).await;
                        info!("usage flush loop exiting (channel closed)");
                        return;
                    }
                }
            }
        }

        while let Ok(msg) = rx.try_recv() {
            absorb(msg, &mut buffer, &mut waiters);
        }

        flush_batch(store.as_ref(), &mut buffer).await;
        for done in waiters.drain(..) {
            let _ = done.send(());
        }
    }
}

fn absorb(
    msg: UsageMsg,
    buffer: &mut Vec<(String, Language)>,
    waiters: &mut Vec<oneshot::Sender<()>>,
) {
    match msg {
        UsageMsg::Touch { source_text, target } => buffer.push((source_text, target)),
        UsageMsg::Flush(done) => waiters.push(done),
    }
}

async fn flush_batch(store: &dyn TranslationStore, buffer: &mut Vec<(String, Language)>) {
    if buffer.is_empty() {
        return;
    }
    let start = std::time::Instant::now();
    let count = buffer.len();
    for (source_text, target) in buffer.drain(..) {
        if let Err(e) = store.increment_usage(&source_text, target).await {
            warn!(error = %e, lang = %target, "usage increment failed");
        }
    }
    debug!(
        count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "usage batch flushed"
    );
}
