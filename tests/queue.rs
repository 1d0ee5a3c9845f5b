mod common;

use std::collections::HashMap;

use common::{rules, service_with, strings, test_config, FakeProvider, MemoryStore};
use lexicache::config::QueueConfig;
use lexicache::{Language, TranslateError, TranslationQueue};

fn answer(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn concurrent_callers_share_one_batch() {
    let provider = FakeProvider::new();
    let store = MemoryStore::new();
    let config = test_config();
    let service = service_with(&config, &provider, &store, rules(&[]));
    let queue = TranslationQueue::start(service, config.queue.clone());

    let (a, b, c) = tokio::join!(
        queue.enqueue(strings(&["A", "B"]), Language::Pt),
        queue.enqueue(strings(&["B", "C"]), Language::Pt),
        queue.enqueue(strings(&["D"]), Language::Pt),
    );

    assert_eq!(a.unwrap(), answer(&[("A", "pt:A"), ("B", "pt:B")]));
    assert_eq!(b.unwrap(), answer(&[("B", "pt:B"), ("C", "pt:C")]));
    assert_eq!(c.unwrap(), answer(&[("D", "pt:D")]));
    assert_eq!(provider.requests(), vec![strings(&["A", "B", "C", "D"])]);
}

#[tokio::test]
async fn language_change_ends_a_batch() {
    let provider = FakeProvider::new();
    let store = MemoryStore::new();
    let config = test_config();
    let service = service_with(&config, &provider, &store, rules(&[]));
    let queue = TranslationQueue::start(service, config.queue.clone());

    let (a, b, c) = tokio::join!(
        queue.enqueue(strings(&["A"]), Language::Pt),
        queue.enqueue(strings(&["B"]), Language::En),
        queue.enqueue(strings(&["C"]), Language::Pt),
    );

    assert_eq!(a.unwrap(), answer(&[("A", "pt:A")]));
    assert_eq!(b.unwrap(), answer(&[("B", "B")]));
    assert_eq!(c.unwrap(), answer(&[("C", "pt:C")]));
    assert_eq!(provider.requests(), vec![strings(&["A"]), strings(&["C"])]);
}

#[tokio::test]
async fn batch_size_caps_a_drain() {
    let provider = FakeProvider::new();
    let store = MemoryStore::new();
    let config = test_config();
    let service = service_with(&config, &provider, &store, rules(&[]));
    let queue = TranslationQueue::start(
        service,
        QueueConfig {
            max_batch_texts: 2,
            ..config.queue.clone()
        },
    );

    let (a, b) = tokio::join!(
        queue.enqueue(strings(&["A", "B"]), Language::Pt),
        queue.enqueue(strings(&["C"]), Language::Pt),
    );

    assert_eq!(a.unwrap().len(), 2);
    assert_eq!(b.unwrap(), answer(&[("C", "pt:C")]));
    assert_eq!(provider.requests(), vec![strings(&["A", "B"]), strings(&["C"])]);
}

#[tokio::test]
async fn failed_texts_come_back_unchanged() {
    let provider = FakeProvider::new();
    provider.fail_always(|| TranslateError::Status {
        status: 456,
        message: "quota exceeded".into(),
    });
    let store = MemoryStore::new();
    let config = test_config();
    let service = service_with(&config, &provider, &store, rules(&[]));
    let queue = TranslationQueue::start(service, config.queue.clone());

    let out = queue
        .enqueue(strings(&["Clients"]), Language::Pt)
        .await
        .unwrap();
    assert_eq!(out, answer(&[("Clients", "Clients")]));
}

#[tokio::test]
async fn empty_request_needs_no_drain() {
    let provider = FakeProvider::new();
    let store = MemoryStore::new();
    let config = test_config();
    let service = service_with(&config, &provider, &store, rules(&[]));
    let queue = TranslationQueue::start(service, config.queue.clone());

    let out = queue.enqueue(Vec::new(), Language::Pt).await.unwrap();
    assert!(out.is_empty());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn closed_queue_rejects_work() {
    let provider = FakeProvider::new();
    let store = MemoryStore::new();
    let config = test_config();
    let service = service_with(&config, &provider, &store, rules(&[]));
    let queue = TranslationQueue::start(service, config.queue.clone());

    queue.shutdown().await;

    let err = queue
        .enqueue(strings(&["A"]), Language::Pt)
        .await
        .unwrap_err();
    assert!(matches!(err, TranslateError::QueueClosed));
}
