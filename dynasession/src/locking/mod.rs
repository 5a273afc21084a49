//! Lock strategies.
//!
//! A strategy decides what happens around every read and write of a session
//! record. [`NullLocking`] passes straight through (last write wins);
//! [`PessimisticLocking`] takes an expiring lock on read and releases it on
//! write. The choice is made once, from configuration, by [`from_config`].

mod null;
mod pessimistic;

pub use null::NullLocking;
pub use pessimistic::PessimisticLocking;

use crate::SessionTable;
use async_trait::async_trait;
use dynasession_core::{Clock, Lease, Result, SessionId};
use std::sync::Arc;

/// What a read returned: the stored payload, if any, and the lock taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquired {
    pub data: Option<String>,
    /// Present only when the strategy now holds a lock on the record.
    pub lease: Option<Lease>,
}

#[async_trait]
pub trait LockStrategy: Send + Sync {
    /// Read the session, taking whatever lock the strategy requires.
    async fn acquire_for_read(&self, id: &SessionId) -> Result<Acquired>;

    /// Persist `data` and give up the lock described by `lease`, if any.
    async fn release_after_write(
        &self,
        id: &SessionId,
        data: &str,
        lease: Option<Lease>,
    ) -> Result<()>;
}

/// Pick the strategy named by `enable_locking`.
pub fn from_config(table: Arc<SessionTable>, clock: Arc<dyn Clock>) -> Arc<dyn LockStrategy> {
    if table.config().enable_locking {
        Arc::new(PessimisticLocking::new(table, clock))
    } else {
        Arc::new(NullLocking::new(table, clock))
    }
}
