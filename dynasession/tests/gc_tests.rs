//! Garbage collection over the in-memory store.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use dynasession::{ExpiryPolicy, GarbageCollector, SessionTable};
use dynasession_core::{ManualClock, SessionConfig, SessionError, SessionId, StoreError};
use dynasession_store::{InMemoryItemStore, ItemStore};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const WEEK: Duration = Duration::from_secs(604_800);

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn secs_ago(secs: i64) -> DateTime<Utc> {
    now() - TimeDelta::seconds(secs)
}

struct Fixture {
    backend: InMemoryItemStore,
    table: Arc<SessionTable>,
    gc: GarbageCollector,
}

fn fixture(config: SessionConfig) -> Fixture {
    let backend = InMemoryItemStore::new();
    let table = Arc::new(SessionTable::new(Arc::new(backend.clone()), Arc::new(config)));
    let gc = GarbageCollector::new(table.clone(), Arc::new(ManualClock::new(now())));
    Fixture { backend, table, gc }
}

async fn seed(table: &SessionTable, id: &str, created: DateTime<Utc>, updated: DateTime<Utc>) {
    let id = SessionId::parse(id).unwrap();
    table.write(&id, "{}", None, created).await.unwrap();
    table.write(&id, "{}", None, updated).await.unwrap();
}

async fn exists(backend: &InMemoryItemStore, id: &str) -> bool {
    backend.get(id, true).await.unwrap().is_some()
}

#[tokio::test]
async fn test_max_age_boundary() {
    let f = fixture(SessionConfig::default());
    seed(&f.table, "expired", secs_ago(604_801), secs_ago(604_801)).await;
    seed(&f.table, "recent", secs_ago(604_799), secs_ago(604_799)).await;

    let deleted = f.gc.collect(WEEK, 25).await.unwrap();

    assert_eq!(deleted, 1);
    assert!(!exists(&f.backend, "expired").await);
    assert!(exists(&f.backend, "recent").await);
}

#[tokio::test]
async fn test_second_sweep_deletes_nothing() {
    let f = fixture(SessionConfig::default());
    for i in 0..5 {
        seed(&f.table, &format!("old-{i}"), secs_ago(700_000), secs_ago(700_000)).await;
    }

    assert_eq!(f.gc.collect(WEEK, 25).await.unwrap(), 5);
    assert_eq!(f.gc.collect(WEEK, 25).await.unwrap(), 0);
    assert!(f.backend.is_empty().await);
}

#[tokio::test]
async fn test_deletes_in_batches() {
    let f = fixture(SessionConfig::default());
    for i in 0..260 {
        seed(&f.table, &format!("s{i:04}"), secs_ago(700_000), secs_ago(700_000)).await;
    }
    seed(&f.table, "keep", secs_ago(10), secs_ago(10)).await;

    let deleted = f.gc.collect(WEEK, 25).await.unwrap();

    assert_eq!(deleted, 260);
    assert_eq!(f.backend.len().await, 1);
    // 260 keys in batches of 25.
    assert_eq!(f.backend.stats().batch_deletes.load(Ordering::Relaxed), 11);
    // 261 records, 100 examined per page.
    assert_eq!(f.backend.stats().scans.load(Ordering::Relaxed), 3);
}

#[tokio::test]
async fn test_max_stale_removes_active_sessions() {
    let f = fixture(SessionConfig::default());
    seed(&f.table, "long-lived", secs_ago(40 * 86_400), secs_ago(60)).await;
    seed(&f.table, "young", secs_ago(86_400), secs_ago(60)).await;

    let age_only = ExpiryPolicy { max_age: Some(WEEK), max_stale: None };
    assert_eq!(f.gc.collect_expired(age_only, 25).await.unwrap(), 0);

    let with_stale =
        ExpiryPolicy { max_age: Some(WEEK), max_stale: Some(Duration::from_secs(30 * 86_400)) };
    assert_eq!(f.gc.collect_expired(with_stale, 25).await.unwrap(), 1);
    assert!(!exists(&f.backend, "long-lived").await);
    assert!(exists(&f.backend, "young").await);
}

#[tokio::test]
async fn test_collect_from_config() {
    let config = SessionConfig::default().with_max_age(WEEK).with_gc_batch_size(2);
    let f = fixture(config);
    seed(&f.table, "a", secs_ago(700_000), secs_ago(700_000)).await;
    seed(&f.table, "b", secs_ago(700_000), secs_ago(700_000)).await;
    seed(&f.table, "c", secs_ago(700_000), secs_ago(700_000)).await;

    assert_eq!(f.gc.collect_from_config().await.unwrap(), 3);
    assert_eq!(f.backend.stats().batch_deletes.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_rejects_unusable_settings() {
    let f = fixture(SessionConfig::default());

    let err = f.gc.collect(WEEK, 0).await.unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));

    let err = f.gc.collect_expired(ExpiryPolicy::default(), 25).await.unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));

    // Neither max_age nor max_stale configured.
    let err = f.gc.collect_from_config().await.unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
}

#[tokio::test]
async fn test_scan_failure_propagates() {
    let f = fixture(SessionConfig::default());
    seed(&f.table, "old", secs_ago(700_000), secs_ago(700_000)).await;
    f.backend.inject_failure(StoreError::Throttled("scan capacity".into())).await;

    let err = f.gc.collect(WEEK, 25).await.unwrap_err();
    assert!(matches!(err, SessionError::Throttled(_)));
    assert!(exists(&f.backend, "old").await);
}
