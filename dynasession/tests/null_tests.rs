//! Sessions without locking: reads and writes go straight through.

use dynasession::SessionStore;
use dynasession_core::{LockState, SessionConfig};
use dynasession_store::{InMemoryItemStore, ItemStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn null_store(backend: &InMemoryItemStore) -> SessionStore {
    let config = SessionConfig::default().with_raise_errors(true);
    SessionStore::new(config, Arc::new(backend.clone())).unwrap()
}

#[tokio::test]
async fn test_last_write_wins() {
    let backend = InMemoryItemStore::new();
    let store = null_store(&backend);

    let mut first = store.load(Some("shared")).await.unwrap();
    let mut second = store.load(Some("shared")).await.unwrap();
    assert_eq!(first.lease(), None);

    first.insert("writer", json!("first"));
    second.insert("writer", json!("second"));
    store.save(first).await.unwrap();
    store.save(second).await.unwrap();

    let session = store.load(Some("shared")).await.unwrap();
    assert_eq!(session.get("writer"), Some(&json!("second")));
}

#[tokio::test]
async fn test_records_carry_no_lock() {
    let backend = InMemoryItemStore::new();
    let store = null_store(&backend);

    let mut session = store.load(Some("plain")).await.unwrap();
    session.insert("k", json!(1));
    store.save(session).await.unwrap();

    let record = backend.get("plain", true).await.unwrap().unwrap();
    assert_eq!(record.lock, LockState::unlocked());
    assert!(record.created_at.is_some());
}

#[tokio::test]
async fn test_load_of_unknown_id_does_not_write() {
    let backend = InMemoryItemStore::new();
    let store = null_store(&backend);

    let session = store.load(Some("missing")).await.unwrap();
    assert!(session.is_new());
    assert_eq!(backend.stats().gets.load(Ordering::Relaxed), 1);
    assert_eq!(backend.stats().writes.load(Ordering::Relaxed), 0);
    assert!(backend.is_empty().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_never_block() {
    let backend = InMemoryItemStore::new();
    let store = Arc::new(null_store(&backend));

    let mut tasks = Vec::new();
    for writer in 0..16u64 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let mut session = store.load(Some("shared")).await?;
            session.insert("writer", json!(writer));
            store.save(session).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let session = store.load(Some("shared")).await.unwrap();
    let writer = session.get("writer").and_then(Value::as_u64).unwrap();
    assert!(writer < 16);
}
