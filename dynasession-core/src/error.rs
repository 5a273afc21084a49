use std::time::Duration;

/// Failure reported by a store backend.
///
/// Backends translate their native errors into one of these variants so the
/// table and lock layers can tell a lost compare-and-swap apart from a
/// transport or capacity problem.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("conditional check failed")]
    ConditionFailed,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store throttled request: {0}")]
    Throttled(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Timed out after {waited:?} waiting for lock on session {session_id}")]
    LockWaitTimeout { session_id: String, waited: Duration },

    #[error("Write conflict on session {session_id}: {reason}")]
    Conflict { session_id: String, reason: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store throttled: {0}")]
    Throttled(String),

    #[error("Corrupt session data for {session_id}: {source}")]
    CorruptData {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid session identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Classification handed to an error handler alongside the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LockWaitTimeout,
    Conflict,
    StoreUnavailable,
    Throttled,
    CorruptData,
    InvalidIdentifier,
    MissingCredential,
    Config,
}

impl ErrorKind {
    /// Store-interaction failures go through the configured error handler.
    /// Everything else is a programmer error and is raised directly.
    pub fn is_routable(self) -> bool {
        !matches!(self, Self::InvalidIdentifier | Self::MissingCredential | Self::Config)
    }
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockWaitTimeout { .. } => ErrorKind::LockWaitTimeout,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Throttled(_) => ErrorKind::Throttled,
            Self::CorruptData { .. } => ErrorKind::CorruptData,
            Self::InvalidIdentifier(_) => ErrorKind::InvalidIdentifier,
            Self::MissingCredential(_) => ErrorKind::MissingCredential,
            // Serializing a JSON object map only fails on programmer error.
            Self::Config(_) | Self::Serde(_) => ErrorKind::Config,
        }
    }

    /// Attach the session id to a store failure.
    pub fn from_store(session_id: &str, err: StoreError) -> Self {
        match err {
            StoreError::ConditionFailed => Self::Conflict {
                session_id: session_id.to_string(),
                reason: "conditional check failed".to_string(),
            },
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Throttled(msg) => Self::Throttled(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
