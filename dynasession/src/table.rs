use chrono::{DateTime, Utc};
use dynasession_core::{
    Lease, LockState, Result, SessionConfig, SessionError, SessionId, SessionRecord, StoreError,
};
use dynasession_store::{Condition, ItemStore, RecordUpdate, ScanFilter};
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::debug;

/// Keys examined per scan request.
const SCAN_PAGE_SIZE: usize = 100;

/// Session records in the backing store.
///
/// Nothing is cached: every call is a round trip, so lock state is always
/// read fresh.
pub struct SessionTable {
    store: Arc<dyn ItemStore>,
    config: Arc<SessionConfig>,
}

impl SessionTable {
    pub fn new(store: Arc<dyn ItemStore>, config: Arc<SessionConfig>) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Point lookup using the configured read consistency.
    pub async fn read(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        self.store
            .get(id.as_str(), self.config.consistent_read)
            .await
            .map_err(|e| SessionError::from_store(id.as_str(), e))
    }

    /// Create or update the record's data.
    ///
    /// With `expected`, the write only lands if the record's lock fields
    /// still equal it; otherwise a `Conflict` is returned.
    pub async fn write(
        &self,
        id: &SessionId,
        data: &str,
        expected: Option<LockState>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let update = RecordUpdate {
            data: Some(data.to_string()),
            updated_at: Some(now),
            created_at_if_absent: Some(now),
            ..Default::default()
        };
        self.store
            .update(id.as_str(), update, expected.map(Condition::LockMatches))
            .await
            .map_err(|e| SessionError::from_store(id.as_str(), e))
    }

    /// Returns whether the record existed.
    pub async fn delete(&self, id: &SessionId) -> Result<bool> {
        self.store.delete(id.as_str()).await.map_err(|e| SessionError::from_store(id.as_str(), e))
    }

    /// Create a record that is already locked. Returns `false` if a record
    /// with this id exists.
    pub async fn create_locked(&self, id: &SessionId, at: DateTime<Utc>) -> Result<bool> {
        let record = SessionRecord::new(id.as_str())
            .with_lock(LockState::held_since(at))
            .with_created_at(at)
            .with_updated_at(at);
        applied(id, self.store.put(record, Some(Condition::NotExists)).await)
    }

    /// Lock an existing record whose lock fields still equal `expected`.
    /// Returns `false` if another writer changed them first.
    pub async fn try_lock(
        &self,
        id: &SessionId,
        expected: LockState,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let update = RecordUpdate { lock: Some(LockState::held_since(at)), ..Default::default() };
        applied(
            id,
            self.store.update(id.as_str(), update, Some(Condition::LockMatches(expected))).await,
        )
    }

    /// Write `data` and unlock, provided the lock is still the one described
    /// by `lease`. Returns `false` if the lock was taken over meanwhile.
    pub async fn release(
        &self,
        id: &SessionId,
        data: &str,
        lease: Lease,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        applied(
            id,
            self.store
                .update(
                    id.as_str(),
                    unlocking_update(data, now),
                    Some(Condition::HeldSince(lease.acquired_at)),
                )
                .await,
        )
    }

    /// Create or overwrite the record unlocked, unless someone holds its lock.
    /// Returns `false` if the record is locked.
    pub async fn write_if_unlocked(
        &self,
        id: &SessionId,
        data: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        applied(
            id,
            self.store
                .update(id.as_str(), unlocking_update(data, now), Some(Condition::Unlocked))
                .await,
        )
    }

    /// Lazily list ids of records last updated before `cutoff`.
    pub fn scan_older_than(&self, cutoff: DateTime<Utc>) -> BoxStream<'_, Result<String>> {
        self.scan_expired(ScanFilter::updated_before(cutoff))
    }

    /// Lazily list ids of records matching `filter`, one store page at a time.
    pub fn scan_expired(&self, filter: ScanFilter) -> BoxStream<'_, Result<String>> {
        Box::pin(async_stream::stream! {
            let mut cursor: Option<String> = None;
            loop {
                let page = match self.store.scan(&filter, cursor.take(), SCAN_PAGE_SIZE).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(scan_error(e));
                        break;
                    }
                };
                debug!(matched = page.ids.len(), more = page.next.is_some(), "scanned page");
                for id in page.ids {
                    yield Ok(id);
                }
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        })
    }

    pub async fn delete_batch(&self, ids: &[String]) -> Result<()> {
        self.store.delete_batch(ids).await.map_err(scan_error)
    }
}

fn unlocking_update(data: &str, now: DateTime<Utc>) -> RecordUpdate {
    RecordUpdate {
        data: Some(data.to_string()),
        lock: Some(LockState::unlocked()),
        updated_at: Some(now),
        created_at_if_absent: Some(now),
    }
}

/// Fold a lost condition into `Ok(false)`.
fn applied(id: &SessionId, result: std::result::Result<(), StoreError>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(StoreError::ConditionFailed) => Ok(false),
        Err(e) => Err(SessionError::from_store(id.as_str(), e)),
    }
}

fn scan_error(e: StoreError) -> SessionError {
    SessionError::from_store("<scan>", e)
}
