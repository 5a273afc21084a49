use crate::{Result, SessionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Longest identifier accepted, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 1024;

/// Validated session identifier.
///
/// Identifiers are opaque to the store. They must be non-empty, at most
/// [`MAX_SESSION_ID_LEN`] bytes, and consist of visible ASCII characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(SessionError::InvalidIdentifier("session id is empty".into()));
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::InvalidIdentifier(format!(
                "session id is {} bytes, limit is {MAX_SESSION_ID_LEN}",
                id.len()
            )));
        }
        if let Some(c) = id.chars().find(|c| !c.is_ascii_graphic()) {
            return Err(SessionError::InvalidIdentifier(format!(
                "session id contains disallowed character {c:?}"
            )));
        }
        Ok(Self(id))
    }

    /// Random identifier for a brand new session.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Lock fields of a session record.
///
/// A record written without locking has no lock attributes at all, which
/// reads as `LockState::default()` (unlocked).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockState {
    pub locked: bool,
    pub acquired_at: Option<DateTime<Utc>>,
}

impl LockState {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn held_since(acquired_at: DateTime<Utc>) -> Self {
        Self { locked: true, acquired_at: Some(acquired_at) }
    }

    /// A lock is valid while it is set and younger than `expiry`.
    ///
    /// A set flag without an acquisition time can never expire on its own,
    /// so it is treated as invalid.
    pub fn is_valid(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        match (self.locked, self.acquired_at) {
            (true, Some(at)) => {
                let held_ms = now.signed_duration_since(at).num_milliseconds();
                let expiry_ms = i64::try_from(expiry.as_millis()).unwrap_or(i64::MAX);
                held_ms < expiry_ms
            }
            _ => false,
        }
    }
}

/// Proof of a lock acquired by the pessimistic strategy.
///
/// Releasing is conditioned on the record still carrying this acquisition
/// time, so a holder whose lock was stolen cannot clobber the new owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub acquired_at: DateTime<Utc>,
}

/// One row of the session table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    /// Serialized session payload, absent until the first write.
    pub data: Option<String>,
    pub lock: LockState,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), data: None, lock: LockState::default(), created_at: None, updated_at: None }
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn with_lock(mut self, lock: LockState) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    #[must_use]
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }
}
