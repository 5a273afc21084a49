use super::{Acquired, LockStrategy};
use crate::SessionTable;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynasession_core::{Clock, Lease, Result, SessionError, SessionId, to_delta};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Outcome of a single pass through the acquisition state machine.
enum Check {
    /// The lock is ours.
    Locked(Acquired),
    /// Another acquirer created the record between our read and our create.
    /// The first such race is re-read straight away. Repeated ones mean the
    /// read is lagging behind the write and are waited on like a held lock.
    CreateRaced,
    /// Someone else holds a valid lock, or won the race to steal an expired one.
    Held,
}

/// Acquire-before-read locking with expiry.
///
/// Reading a session takes an exclusive lock on its record, and writing
/// releases it. A lock older than `lock_expiry_time` is treated as abandoned
/// and may be stolen. Acquisition polls every `lock_retry_delay` and gives up
/// with [`SessionError::LockWaitTimeout`] once `lock_max_wait_time` has passed.
///
/// Mutual exclusion rests entirely on the store's conditional writes: every
/// transition of the lock fields is conditioned on the value just read.
pub struct PessimisticLocking {
    table: Arc<SessionTable>,
    clock: Arc<dyn Clock>,
    expiry: Duration,
    retry_delay: Duration,
    max_wait: Duration,
}

impl PessimisticLocking {
    pub fn new(table: Arc<SessionTable>, clock: Arc<dyn Clock>) -> Self {
        let config = table.config();
        let (expiry, retry_delay, max_wait) =
            (config.lock_expiry_time(), config.lock_retry_delay(), config.lock_max_wait_time());
        Self { table, clock, expiry, retry_delay, max_wait }
    }

    async fn check(&self, id: &SessionId) -> Result<Check> {
        let now = self.clock.now();
        let lease = Lease { acquired_at: now };

        let Some(record) = self.table.read(id).await? else {
            if self.table.create_locked(id, now).await? {
                debug!(session_id = %id, "created locked session");
                return Ok(Check::Locked(Acquired { data: None, lease: Some(lease) }));
            }
            debug!(session_id = %id, "lost creation race");
            return Ok(Check::CreateRaced);
        };

        if record.lock.is_valid(now, self.expiry) {
            return Ok(Check::Held);
        }

        if self.table.try_lock(id, record.lock, now).await? {
            if record.lock.locked {
                debug!(
                    session_id = %id,
                    previous = ?record.lock.acquired_at,
                    "took over expired lock"
                );
            } else {
                debug!(session_id = %id, "acquired lock");
            }
            return Ok(Check::Locked(Acquired { data: record.data, lease: Some(lease) }));
        }

        Ok(Check::Held)
    }

    fn timed_out(&self, id: &SessionId, started: DateTime<Utc>, now: DateTime<Utc>) -> SessionError {
        let waited = now.signed_duration_since(started).to_std().unwrap_or_default();
        warn!(session_id = %id, waited_ms = waited.as_millis() as u64, "lock wait timed out");
        SessionError::LockWaitTimeout { session_id: id.to_string(), waited }
    }
}

#[async_trait]
impl LockStrategy for PessimisticLocking {
    #[instrument(skip_all, fields(session_id = %id))]
    async fn acquire_for_read(&self, id: &SessionId) -> Result<Acquired> {
        let started = self.clock.now();
        let deadline = started + to_delta(self.max_wait);

        let mut raced = false;
        loop {
            match self.check(id).await? {
                Check::Locked(acquired) => return Ok(acquired),
                Check::CreateRaced if !raced => raced = true,
                Check::CreateRaced | Check::Held => {
                    let now = self.clock.now();
                    if now >= deadline {
                        return Err(self.timed_out(id, started, now));
                    }
                    // The last sleep is cut short so the wait never exceeds max_wait.
                    let remaining = deadline.signed_duration_since(now).to_std().unwrap_or_default();
                    let delay = self.retry_delay.min(remaining);
                    debug!(
                        session_id = %id,
                        delay_ms = delay.as_millis() as u64,
                        "session locked, retrying"
                    );
                    self.clock.sleep(delay).await;
                }
            }
        }
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn release_after_write(
        &self,
        id: &SessionId,
        data: &str,
        lease: Option<Lease>,
    ) -> Result<()> {
        let now = self.clock.now();

        let Some(lease) = lease else {
            // Nothing was acquired for this id, e.g. a freshly generated session.
            if self.table.write_if_unlocked(id, data, now).await? {
                return Ok(());
            }
            warn!(session_id = %id, "session is locked by another holder; write discarded");
            return Err(SessionError::Conflict {
                session_id: id.to_string(),
                reason: "session is locked and no lease was held".to_string(),
            });
        };

        if self.table.release(id, data, lease, now).await? {
            debug!(session_id = %id, "released lock");
            return Ok(());
        }

        warn!(
            session_id = %id,
            acquired_at = %lease.acquired_at,
            "lock was taken over before release; write discarded"
        );
        Err(SessionError::Conflict {
            session_id: id.to_string(),
            reason: format!("lock acquired at {} is no longer held", lease.acquired_at),
        })
    }
}
