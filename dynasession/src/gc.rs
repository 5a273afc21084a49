use crate::SessionTable;
use chrono::{DateTime, Utc};
use dynasession_core::{Clock, Result, SessionError, to_delta};
use dynasession_store::ScanFilter;
use dynasession_telemetry::{gc_sweep_span, record_gc_result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info};

/// Which sessions a sweep removes. A session matching either limit goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryPolicy {
    /// Remove sessions not updated for longer than this.
    pub max_age: Option<Duration>,
    /// Remove sessions created longer ago than this, however active.
    pub max_stale: Option<Duration>,
}

/// Deletes abandoned sessions.
///
/// A sweep scans the whole table, so run it from a periodic job rather than
/// on the request path. Deletes are unconditional: a session whose lock was
/// just taken can be removed underneath its holder, who will then find no
/// record and start a fresh session.
pub struct GarbageCollector {
    table: Arc<SessionTable>,
    clock: Arc<dyn Clock>,
}

impl GarbageCollector {
    pub fn new(table: Arc<SessionTable>, clock: Arc<dyn Clock>) -> Self {
        Self { table, clock }
    }

    /// Delete sessions not updated within `max_age`, `batch_size` keys at a
    /// time. Returns the number deleted.
    pub async fn collect(&self, max_age: Duration, batch_size: usize) -> Result<usize> {
        let policy = ExpiryPolicy { max_age: Some(max_age), max_stale: None };
        self.collect_expired(policy, batch_size).await
    }

    /// Sweep with the configured `max_age`, `max_stale` and batch size.
    pub async fn collect_from_config(&self) -> Result<usize> {
        let config = self.table.config();
        let policy = ExpiryPolicy { max_age: config.max_age(), max_stale: config.max_stale() };
        self.collect_expired(policy, config.gc_batch_size).await
    }

    pub async fn collect_expired(&self, policy: ExpiryPolicy, batch_size: usize) -> Result<usize> {
        if batch_size == 0 {
            return Err(SessionError::Config("batch size must be positive".into()));
        }
        let filter = self.filter(policy)?;
        let span = gc_sweep_span(&self.table.config().table_name);
        self.sweep(filter, batch_size).instrument(span).await
    }

    fn filter(&self, policy: ExpiryPolicy) -> Result<ScanFilter> {
        if policy.max_age.is_none() && policy.max_stale.is_none() {
            return Err(SessionError::Config(
                "garbage collection needs max_age or max_stale".into(),
            ));
        }
        let now = self.clock.now();
        let cutoff = |limit: Duration| {
            now.checked_sub_signed(to_delta(limit)).unwrap_or(DateTime::<Utc>::MIN_UTC)
        };
        Ok(ScanFilter {
            updated_before: policy.max_age.map(cutoff),
            created_before: policy.max_stale.map(cutoff),
        })
    }

    async fn sweep(&self, filter: ScanFilter, batch_size: usize) -> Result<usize> {
        let started = Instant::now();
        let mut ids = self.table.scan_expired(filter);
        let mut batch = Vec::with_capacity(batch_size);
        let mut deleted = 0;

        while let Some(id) = ids.next().await {
            batch.push(id?);
            if batch.len() == batch_size {
                deleted += self.flush(&mut batch).await?;
            }
        }
        deleted += self.flush(&mut batch).await?;

        record_gc_result(deleted);
        info!(deleted, elapsed_ms = started.elapsed().as_millis() as u64, "garbage collection finished");
        Ok(deleted)
    }

    async fn flush(&self, batch: &mut Vec<String>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        self.table.delete_batch(batch).await?;
        let n = batch.len();
        debug!(count = n, "deleted expired sessions");
        batch.clear();
        Ok(n)
    }
}
