use crate::{Condition, ItemStore, RecordUpdate, ScanFilter, ScanPage, StoreResult};
use async_trait::async_trait;
use dynasession_core::{SessionRecord, StoreError};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, SessionRecord>,
    injected_failures: VecDeque<StoreError>,
}

/// Operation counters, useful for asserting round trips in tests.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub gets: AtomicUsize,
    pub writes: AtomicUsize,
    pub deletes: AtomicUsize,
    pub batch_deletes: AtomicUsize,
    pub scans: AtomicUsize,
}

/// In-process [`ItemStore`] with the same conditional-write semantics as the
/// remote backends. Each operation takes the table lock once, so every
/// conditional write is atomic with respect to every other operation.
///
/// Clones share the same table.
#[derive(Clone, Default)]
pub struct InMemoryItemStore {
    inner: Arc<RwLock<Inner>>,
    stats: Arc<StoreStats>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Make the next store operation fail with `error` instead of executing.
    pub async fn inject_failure(&self, error: StoreError) {
        self.inner.write().await.injected_failures.push_back(error);
    }

    fn take_failure(inner: &mut Inner) -> StoreResult<()> {
        match inner.injected_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check(condition: Option<Condition>, current: Option<&SessionRecord>) -> StoreResult<()> {
        match condition {
            Some(cond) if !cond.holds_for(current) => Err(StoreError::ConditionFailed),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, id: &str, _consistent_read: bool) -> StoreResult<Option<SessionRecord>> {
        self.stats.gets.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        Self::take_failure(&mut inner)?;
        Ok(inner.records.get(id).cloned())
    }

    async fn put(&self, record: SessionRecord, condition: Option<Condition>) -> StoreResult<()> {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        Self::take_failure(&mut inner)?;
        Self::check(condition, inner.records.get(&record.id))?;
        inner.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(
        &self,
        id: &str,
        update: RecordUpdate,
        condition: Option<Condition>,
    ) -> StoreResult<()> {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        Self::take_failure(&mut inner)?;
        Self::check(condition, inner.records.get(id))?;
        let record =
            inner.records.entry(id.to_string()).or_insert_with(|| SessionRecord::new(id));
        update.apply_to(record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        Self::take_failure(&mut inner)?;
        Ok(inner.records.remove(id).is_some())
    }

    async fn delete_batch(&self, ids: &[String]) -> StoreResult<()> {
        self.stats.batch_deletes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        Self::take_failure(&mut inner)?;
        for id in ids {
            inner.records.remove(id);
        }
        Ok(())
    }

    async fn scan(
        &self,
        filter: &ScanFilter,
        start_after: Option<String>,
        limit: usize,
    ) -> StoreResult<ScanPage> {
        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        Self::take_failure(&mut inner)?;

        let lower = match start_after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        // Like DynamoDB, `limit` caps the records examined, not the matches returned.
        let limit = limit.max(1);
        let mut examined = inner.records.range((lower, Bound::Unbounded)).take(limit).peekable();
        let mut ids = Vec::new();
        let mut last_key = None;
        while let Some((key, record)) = examined.next() {
            if filter.matches(record) {
                ids.push(key.clone());
            }
            if examined.peek().is_none() {
                last_key = Some(key.clone());
            }
        }

        let next = last_key.filter(|key| {
            inner.records.range((Bound::Excluded(key.clone()), Bound::Unbounded)).next().is_some()
        });

        Ok(ScanPage { ids, next })
    }
}
