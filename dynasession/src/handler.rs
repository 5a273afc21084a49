use dynasession_core::{ErrorKind, SessionError};
use tracing::warn;

/// What to do with a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Propagate the error to the caller.
    Rethrow,
    /// Swallow it; the caller continues with an empty session.
    Suppressed,
}

/// Decides whether a store-interaction failure aborts the request.
///
/// Only errors whose [`ErrorKind::is_routable`] is true are offered to the
/// handler; configuration and identifier errors are always raised.
///
/// Closures of the right shape are handlers too:
///
/// ```
/// use dynasession::{ErrorHandler, Verdict};
/// use dynasession_core::ErrorKind;
///
/// let strict = |_err: &dynasession_core::SessionError, _kind: ErrorKind| Verdict::Rethrow;
/// let _: &dyn ErrorHandler = &strict;
/// ```
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &SessionError, kind: ErrorKind) -> Verdict;
}

impl<F> ErrorHandler for F
where
    F: Fn(&SessionError, ErrorKind) -> Verdict + Send + Sync,
{
    fn handle(&self, error: &SessionError, kind: ErrorKind) -> Verdict {
        self(error, kind)
    }
}

/// Logs and suppresses store failures unless `raise_errors` is set.
/// Lock wait timeouts are always rethrown.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler {
    raise_errors: bool,
}

impl DefaultErrorHandler {
    pub fn new(raise_errors: bool) -> Self {
        Self { raise_errors }
    }
}

impl ErrorHandler for DefaultErrorHandler {
    fn handle(&self, error: &SessionError, kind: ErrorKind) -> Verdict {
        if self.raise_errors || kind == ErrorKind::LockWaitTimeout || !kind.is_routable() {
            return Verdict::Rethrow;
        }
        warn!(error = %error, kind = ?kind, "suppressed session store error");
        Verdict::Suppressed
    }
}
