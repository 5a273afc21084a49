use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynasession_core::{LockState, SessionRecord, StoreError};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Server-side predicate attached to a write.
///
/// The write is applied only if the predicate holds for the record as it
/// exists at the moment the store executes the write. Otherwise the store
/// returns [`StoreError::ConditionFailed`] and changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// No record with this key exists.
    NotExists,
    /// The record exists and its lock fields equal the given state exactly.
    LockMatches(LockState),
    /// The record is locked and was locked at exactly this instant.
    HeldSince(DateTime<Utc>),
    /// No record exists, or it exists and nobody holds its lock.
    Unlocked,
}

impl Condition {
    /// Evaluate the predicate against the current record, if any.
    pub fn holds_for(&self, current: Option<&SessionRecord>) -> bool {
        match (self, current) {
            (Self::NotExists, current) => current.is_none(),
            (Self::Unlocked, current) => current.is_none_or(|record| !record.lock.locked),
            (Self::LockMatches(expected), Some(record)) => record.lock == *expected,
            (Self::HeldSince(at), Some(record)) => {
                record.lock.locked && record.lock.acquired_at == Some(*at)
            }
            (_, None) => false,
        }
    }
}

/// Attributes to set on an upsert. Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub data: Option<String>,
    /// Overwrite both lock attributes. An `acquired_at` of `None` removes it.
    pub lock: Option<LockState>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set `created_at` only if the record does not have one yet.
    pub created_at_if_absent: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    /// Apply the update to an existing or freshly created record.
    pub fn apply_to(&self, record: &mut SessionRecord) {
        if let Some(data) = &self.data {
            record.data = Some(data.clone());
        }
        if let Some(lock) = self.lock {
            record.lock = lock;
        }
        if let Some(at) = self.updated_at {
            record.updated_at = Some(at);
        }
        if record.created_at.is_none() {
            record.created_at = self.created_at_if_absent;
        }
    }
}

/// Selects records for garbage collection.
///
/// A record matches when any configured cutoff matches. Records that lack
/// the compared attribute never match on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Match records whose `updated_at` is strictly before this instant.
    pub updated_before: Option<DateTime<Utc>>,
    /// Match records whose `created_at` is strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
}

impl ScanFilter {
    pub fn updated_before(cutoff: DateTime<Utc>) -> Self {
        Self { updated_before: Some(cutoff), created_before: None }
    }

    pub fn is_empty(&self) -> bool {
        self.updated_before.is_none() && self.created_before.is_none()
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        let before = |cutoff: Option<DateTime<Utc>>, at: Option<DateTime<Utc>>| match (cutoff, at) {
            (Some(cutoff), Some(at)) => at < cutoff,
            _ => false,
        };
        before(self.updated_before, record.updated_at)
            || before(self.created_before, record.created_at)
    }
}

/// One page of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub ids: Vec<String>,
    /// Pass back to `scan` to continue, `None` once the table is exhausted.
    pub next: Option<String>,
}

/// Thin adapter over a remote key-value store.
///
/// Every call is a round trip to the store. Implementations must apply each
/// conditional write atomically: that atomicity is the only thing that
/// breaks ties between concurrent lock acquirers.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, id: &str, consistent_read: bool) -> StoreResult<Option<SessionRecord>>;

    /// Create or replace the whole record.
    async fn put(&self, record: SessionRecord, condition: Option<Condition>) -> StoreResult<()>;

    /// Create the record if missing, then set the attributes named in `update`.
    async fn update(
        &self,
        id: &str,
        update: RecordUpdate,
        condition: Option<Condition>,
    ) -> StoreResult<()>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    /// Unconditionally remove every listed record.
    async fn delete_batch(&self, ids: &[String]) -> StoreResult<()> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }

    async fn scan(
        &self,
        filter: &ScanFilter,
        start_after: Option<String>,
        limit: usize,
    ) -> StoreResult<ScanPage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_condition_not_exists() {
        let record = SessionRecord::new("a");
        assert!(Condition::NotExists.holds_for(None));
        assert!(!Condition::NotExists.holds_for(Some(&record)));
    }

    #[test]
    fn test_condition_lock_matches_requires_record() {
        let cond = Condition::LockMatches(LockState::unlocked());
        assert!(!cond.holds_for(None));
        assert!(cond.holds_for(Some(&SessionRecord::new("a"))));

        let locked = SessionRecord::new("a").with_lock(LockState::held_since(t(5)));
        assert!(!cond.holds_for(Some(&locked)));
        assert!(Condition::LockMatches(LockState::held_since(t(5))).holds_for(Some(&locked)));
    }

    #[test]
    fn test_condition_held_since() {
        let locked = SessionRecord::new("a").with_lock(LockState::held_since(t(5)));
        assert!(Condition::HeldSince(t(5)).holds_for(Some(&locked)));
        assert!(!Condition::HeldSince(t(6)).holds_for(Some(&locked)));

        let released = SessionRecord::new("a")
            .with_lock(LockState { locked: false, acquired_at: Some(t(5)) });
        assert!(!Condition::HeldSince(t(5)).holds_for(Some(&released)));
    }

    #[test]
    fn test_condition_unlocked() {
        assert!(Condition::Unlocked.holds_for(None));
        assert!(Condition::Unlocked.holds_for(Some(&SessionRecord::new("a"))));

        let released = SessionRecord::new("a")
            .with_lock(LockState { locked: false, acquired_at: Some(t(5)) });
        assert!(Condition::Unlocked.holds_for(Some(&released)));

        let locked = SessionRecord::new("a").with_lock(LockState::held_since(t(5)));
        assert!(!Condition::Unlocked.holds_for(Some(&locked)));
    }

    #[test]
    fn test_update_keeps_created_at() {
        let mut record = SessionRecord::new("a").with_created_at(t(1));
        RecordUpdate {
            data: Some("{}".into()),
            updated_at: Some(t(9)),
            created_at_if_absent: Some(t(9)),
            ..Default::default()
        }
        .apply_to(&mut record);

        assert_eq!(record.created_at, Some(t(1)));
        assert_eq!(record.updated_at, Some(t(9)));
        assert_eq!(record.data.as_deref(), Some("{}"));
        assert_eq!(record.lock, LockState::unlocked());
    }

    #[test]
    fn test_scan_filter_is_strict_and_ors_cutoffs() {
        let record = SessionRecord::new("a").with_created_at(t(10)).with_updated_at(t(100));

        assert!(!ScanFilter::updated_before(t(100)).matches(&record));
        assert!(ScanFilter::updated_before(t(101)).matches(&record));

        let by_creation = ScanFilter { updated_before: Some(t(50)), created_before: Some(t(11)) };
        assert!(by_creation.matches(&record));

        assert!(!ScanFilter::updated_before(t(1_000)).matches(&SessionRecord::new("fresh")));
        assert!(ScanFilter::default().is_empty());
    }
}
