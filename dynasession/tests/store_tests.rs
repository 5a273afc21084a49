//! Request-level flows through `SessionStore`, including error routing.

use dynasession::{SessionStore, Verdict};
use dynasession_core::{
    ErrorKind, LockState, ManualClock, SessionConfig, SessionError, SessionId, SessionRecord,
    StoreError,
};
use dynasession_store::{InMemoryItemStore, ItemStore};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn store_with(backend: &InMemoryItemStore, config: SessionConfig) -> SessionStore {
    SessionStore::builder(config, Arc::new(backend.clone()))
        .with_clock(Arc::new(ManualClock::at_epoch()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_new_session_gets_generated_id() {
    let backend = InMemoryItemStore::new();
    let store = store_with(&backend, SessionConfig::default());

    let first = store.load(None).await.unwrap();
    let second = store.load(None).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert!(SessionId::parse(first.id().as_str()).is_ok());
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn test_delete_returns_fresh_id() {
    let backend = InMemoryItemStore::new();
    let store = store_with(&backend, SessionConfig::default());

    let mut session = store.load(None).await.unwrap();
    session.insert("k", json!("v"));
    let id = store.save(session).await.unwrap();

    let next = store.delete(&id).await.unwrap();
    assert_ne!(next, id);
    assert!(backend.get(id.as_str(), true).await.unwrap().is_none());

    // Deleting again is not an error.
    store.delete(&id).await.unwrap();
}

#[tokio::test]
async fn test_invalid_id_is_never_suppressed() {
    let backend = InMemoryItemStore::new();
    let store = store_with(&backend, SessionConfig::default());

    let err = store.load(Some("")).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidIdentifier(_)));

    let err = store.load(Some("has space")).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidIdentifier(_)));
}

#[tokio::test]
async fn test_unavailable_store_yields_empty_session() {
    let backend = InMemoryItemStore::new();
    let store = store_with(&backend, SessionConfig::default());

    let mut session = store.load(Some("abc")).await.unwrap();
    session.insert("k", json!(1));
    store.save(session).await.unwrap();

    backend.inject_failure(StoreError::Unavailable("connection reset".into())).await;
    let session = store.load(Some("abc")).await.unwrap();
    assert_ne!(session.id().as_str(), "abc");
    assert!(session.is_new());
    assert!(session.data().is_empty());
}

fn locked_config() -> SessionConfig {
    SessionConfig::default()
        .with_locking(true)
        .with_lock_expiry_time(Duration::from_secs(10))
        .with_lock_max_wait_time(Duration::ZERO)
}

#[tokio::test]
async fn test_suppressed_load_cannot_clobber_held_lock() {
    let backend = InMemoryItemStore::new();
    backend.put(SessionRecord::new("shared").with_data(r#"{"owner":"a"}"#), None).await.unwrap();
    let store = store_with(&backend, locked_config());

    let a = store.load(Some("shared")).await.unwrap();
    let held = a.lease().unwrap();

    backend.inject_failure(StoreError::Unavailable("connection reset".into())).await;
    let mut b = store.load(Some("shared")).await.unwrap();
    assert_ne!(b.id().as_str(), "shared");
    assert!(b.lease().is_none());
    b.insert("owner", json!("b"));
    let b_id = store.save(b).await.unwrap();

    let record = backend.get("shared", true).await.unwrap().unwrap();
    assert_eq!(record.lock, LockState::held_since(held.acquired_at));
    assert_eq!(record.data.as_deref(), Some(r#"{"owner":"a"}"#));
    let written = backend.get(b_id.as_str(), true).await.unwrap().unwrap();
    assert_eq!(written.data.as_deref(), Some(r#"{"owner":"b"}"#));

    // A still owns the lock and can save normally.
    store.save(a).await.unwrap();
    let record = backend.get("shared", true).await.unwrap().unwrap();
    assert!(!record.lock.locked);
}

#[tokio::test]
async fn test_suppressed_lock_timeout_leaves_holder_intact() {
    let backend = InMemoryItemStore::new();
    let store = SessionStore::builder(locked_config(), Arc::new(backend.clone()))
        .with_clock(Arc::new(ManualClock::at_epoch()))
        .with_error_handler(Arc::new(|_: &SessionError, _: ErrorKind| Verdict::Suppressed))
        .build()
        .unwrap();

    let mut a = store.load(Some("shared")).await.unwrap();
    a.insert("owner", json!("a"));

    let mut b = store.load(Some("shared")).await.unwrap();
    assert_ne!(b.id().as_str(), "shared");
    b.insert("owner", json!("b"));
    store.save(b).await.unwrap();

    let record = backend.get("shared", true).await.unwrap().unwrap();
    assert!(record.lock.locked);
    assert_eq!(record.data, None);

    store.save(a).await.unwrap();
    let record = backend.get("shared", true).await.unwrap().unwrap();
    assert_eq!(record.data.as_deref(), Some(r#"{"owner":"a"}"#));
}

#[tokio::test]
async fn test_raise_errors_surfaces_store_failures() {
    let backend = InMemoryItemStore::new();
    let store = store_with(&backend, SessionConfig::default().with_raise_errors(true));

    backend.inject_failure(StoreError::Unavailable("connection reset".into())).await;
    let err = store.load(Some("abc")).await.unwrap_err();
    assert!(matches!(err, SessionError::StoreUnavailable(_)));

    let session = store.load(None).await.unwrap();
    backend.inject_failure(StoreError::Throttled("write capacity".into())).await;
    let err = store.save(session).await.unwrap_err();
    assert!(matches!(err, SessionError::Throttled(_)));
}

#[tokio::test]
async fn test_custom_handler_sees_every_routed_error() {
    let backend = InMemoryItemStore::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let handler = move |_: &SessionError, kind: ErrorKind| {
        recorder.lock().unwrap().push(kind);
        Verdict::Suppressed
    };
    let store = SessionStore::builder(SessionConfig::default(), Arc::new(backend.clone()))
        .with_error_handler(Arc::new(handler))
        .build()
        .unwrap();

    backend.inject_failure(StoreError::Throttled("read capacity".into())).await;
    store.load(Some("abc")).await.unwrap();

    let session = store.load(None).await.unwrap();
    backend.inject_failure(StoreError::Unavailable("timeout".into())).await;
    store.save(session).await.unwrap();

    backend.inject_failure(StoreError::Unavailable("timeout".into())).await;
    store.delete(&SessionId::parse("abc").unwrap()).await.unwrap();

    assert!(store.load(Some("bad id")).await.is_err());

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![ErrorKind::Throttled, ErrorKind::StoreUnavailable, ErrorKind::StoreUnavailable]
    );
}

#[tokio::test]
async fn test_corrupt_data_is_routed() {
    let backend = InMemoryItemStore::new();
    backend.put(SessionRecord::new("broken").with_data("{not json"), None).await.unwrap();

    let lenient = store_with(&backend, SessionConfig::default());
    let session = lenient.load(Some("broken")).await.unwrap();
    assert!(session.data().is_empty());

    let strict = store_with(&backend, SessionConfig::default().with_raise_errors(true));
    let err = strict.load(Some("broken")).await.unwrap_err();
    assert!(matches!(err, SessionError::CorruptData { .. }));
}

#[tokio::test]
async fn test_corrupt_locked_session_can_be_overwritten() {
    let backend = InMemoryItemStore::new();
    backend.put(SessionRecord::new("broken").with_data("[1, 2"), None).await.unwrap();
    let store = store_with(&backend, SessionConfig::default().with_locking(true));

    let mut session = store.load(Some("broken")).await.unwrap();
    assert!(session.lease().is_some());
    session.insert("repaired", json!(true));
    store.save(session).await.unwrap();

    let record = backend.get("broken", true).await.unwrap().unwrap();
    assert!(!record.lock.locked);
    assert_eq!(record.data.as_deref(), Some(r#"{"repaired":true}"#));
}
