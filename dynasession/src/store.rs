use crate::gc::GarbageCollector;
use crate::handler::{DefaultErrorHandler, ErrorHandler, Verdict};
use crate::locking::{self, LockStrategy};
use crate::table::SessionTable;
use dynasession_core::{Clock, Lease, Result, SessionConfig, SessionError, SessionId, SystemClock};
use dynasession_store::ItemStore;
use dynasession_telemetry::{session_load_span, session_save_span};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, debug};

/// Deserialized session payload.
pub type SessionData = HashMap<String, Value>;

/// A session read at the start of a request, to be handed back to
/// [`SessionStore::save`] at the end of it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSession {
    id: SessionId,
    data: SessionData,
    lease: Option<Lease>,
    is_new: bool,
}

impl LoadedSession {
    fn fresh(id: SessionId) -> Self {
        Self { id, data: SessionData::new(), lease: None, is_new: true }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SessionData {
        &mut self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    /// The lock held on this session's record, if loading took one.
    pub fn lease(&self) -> Option<Lease> {
        self.lease
    }

    /// True when nothing was stored under this id yet.
    pub fn is_new(&self) -> bool {
        self.is_new
    }
}

/// The request-facing surface: load a session, save it, delete it.
///
/// Store failures are offered to the [`ErrorHandler`]; when it suppresses
/// one, `load` returns an empty session under a newly generated id and
/// `save` returns as if the write had succeeded.
///
/// # Example
///
/// ```no_run
/// use dynasession::SessionStore;
/// use dynasession_core::SessionConfig;
/// use dynasession_store::InMemoryItemStore;
/// use std::sync::Arc;
///
/// # async fn example() -> dynasession_core::Result<()> {
/// let store = SessionStore::new(SessionConfig::default(), Arc::new(InMemoryItemStore::new()))?;
///
/// let mut session = store.load(None).await?;
/// session.insert("user_id", serde_json::json!(42));
/// let id = store.save(session).await?;
///
/// let session = store.load(Some(id.as_str())).await?;
/// assert_eq!(session.get("user_id"), Some(&serde_json::json!(42)));
/// # Ok(())
/// # }
/// ```
pub struct SessionStore {
    table: Arc<SessionTable>,
    strategy: Arc<dyn LockStrategy>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn ErrorHandler>,
}

impl SessionStore {
    /// Build a store with the system clock and the default error handler.
    pub fn new(config: SessionConfig, store: Arc<dyn ItemStore>) -> Result<Self> {
        Self::builder(config, store).build()
    }

    pub fn builder(config: SessionConfig, store: Arc<dyn ItemStore>) -> SessionStoreBuilder {
        SessionStoreBuilder { config, store, clock: None, handler: None }
    }

    pub fn config(&self) -> &SessionConfig {
        self.table.config()
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    pub fn garbage_collector(&self) -> GarbageCollector {
        GarbageCollector::new(self.table.clone(), self.clock.clone())
    }

    /// Read the session named by `id`, or start a new one.
    ///
    /// Without an id a fresh one is generated and the store is not touched.
    /// With locking enabled, the returned session holds the record's lock
    /// until it is saved.
    pub async fn load(&self, id: Option<&str>) -> Result<LoadedSession> {
        let Some(raw) = id else {
            let session = LoadedSession::fresh(SessionId::generate());
            debug!(session_id = %session.id, "generated new session id");
            return Ok(session);
        };
        let id = SessionId::parse(raw)?;

        let span = session_load_span(id.as_str(), self.config().enable_locking);
        async move {
            let acquired = match self.strategy.acquire_for_read(&id).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    self.route(e)?;
                    // Never hand out a lockless session for an id someone may hold.
                    let session = LoadedSession::fresh(SessionId::generate());
                    debug!(
                        session_id = %id,
                        replacement = %session.id,
                        "load failed, continuing with a new session"
                    );
                    return Ok(session);
                }
            };

            let is_new = acquired.data.is_none();
            let data = match decode(&id, acquired.data.as_deref()) {
                Ok(data) => data,
                Err(e) => {
                    // The lease is kept so the next save still releases the lock.
                    self.route(e)?;
                    SessionData::new()
                }
            };
            Ok(LoadedSession { id, data, lease: acquired.lease, is_new })
        }
        .instrument(span)
        .await
    }

    /// Persist the session and release any lock it holds.
    pub async fn save(&self, session: LoadedSession) -> Result<SessionId> {
        let LoadedSession { id, data, lease, .. } = session;
        let payload = serde_json::to_string(&data)?;

        let span = session_save_span(id.as_str(), self.config().enable_locking);
        let written = self.strategy.release_after_write(&id, &payload, lease).instrument(span).await;
        if let Err(e) = written {
            self.route(e)?;
        }
        Ok(id)
    }

    /// Remove the session's record and hand back a new id to continue with.
    pub async fn delete(&self, id: &SessionId) -> Result<SessionId> {
        match self.table.delete(id).await {
            Ok(existed) => debug!(session_id = %id, existed, "deleted session"),
            Err(e) => self.route(e)?,
        }
        Ok(SessionId::generate())
    }

    /// Raise `error` unless it is routable and the handler suppresses it.
    fn route(&self, error: SessionError) -> Result<()> {
        let kind = error.kind();
        if !kind.is_routable() {
            return Err(error);
        }
        match self.handler.handle(&error, kind) {
            Verdict::Rethrow => Err(error),
            Verdict::Suppressed => Ok(()),
        }
    }
}

fn decode(id: &SessionId, data: Option<&str>) -> Result<SessionData> {
    match data {
        None => Ok(SessionData::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|source| SessionError::CorruptData {
            session_id: id.to_string(),
            source,
        }),
    }
}

pub struct SessionStoreBuilder {
    config: SessionConfig,
    store: Arc<dyn ItemStore>,
    clock: Option<Arc<dyn Clock>>,
    handler: Option<Arc<dyn ErrorHandler>>,
}

impl SessionStoreBuilder {
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the default handler, which follows `raise_errors`.
    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate the configuration and wire up the lock strategy it selects.
    pub fn build(self) -> Result<SessionStore> {
        self.config.validate()?;
        let handler = self
            .handler
            .unwrap_or_else(|| Arc::new(DefaultErrorHandler::new(self.config.raise_errors)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let table = Arc::new(SessionTable::new(self.store, Arc::new(self.config)));
        let strategy = locking::from_config(table.clone(), clock.clone());
        Ok(SessionStore { table, strategy, clock, handler })
    }
}
