use super::{Acquired, LockStrategy};
use crate::SessionTable;
use async_trait::async_trait;
use dynasession_core::{Clock, Lease, Result, SessionId};
use std::sync::Arc;
use tracing::instrument;

/// No coordination: reads and writes go straight to the table and
/// concurrent writers race, last write wins.
pub struct NullLocking {
    table: Arc<SessionTable>,
    clock: Arc<dyn Clock>,
}

impl NullLocking {
    pub fn new(table: Arc<SessionTable>, clock: Arc<dyn Clock>) -> Self {
        Self { table, clock }
    }
}

#[async_trait]
impl LockStrategy for NullLocking {
    #[instrument(skip_all, fields(session_id = %id))]
    async fn acquire_for_read(&self, id: &SessionId) -> Result<Acquired> {
        let record = self.table.read(id).await?;
        Ok(Acquired { data: record.and_then(|r| r.data), lease: None })
    }

    #[instrument(skip_all, fields(session_id = %id))]
    async fn release_after_write(
        &self,
        id: &SessionId,
        data: &str,
        _lease: Option<Lease>,
    ) -> Result<()> {
        self.table.write(id, data, None, self.clock.now()).await
    }
}
