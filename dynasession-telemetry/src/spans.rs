//! Span helpers for session operations

use tracing::Span;

/// Create a span covering one session load (lock acquisition and read).
///
/// # Example
/// ```
/// use dynasession_telemetry::session_load_span;
/// let span = session_load_span("0f3a9c", true);
/// let _enter = span.enter();
/// ```
pub fn session_load_span(session_id: &str, locking: bool) -> Span {
    tracing::info_span!("session.load", session.id = session_id, session.locking = locking)
}

/// Create a span covering one session save (write and lock release).
pub fn session_save_span(session_id: &str, locking: bool) -> Span {
    tracing::info_span!("session.save", session.id = session_id, session.locking = locking)
}

/// Create a span covering a garbage collection sweep.
///
/// `deleted` is left empty and can be filled in with [`record_gc_result`].
pub fn gc_sweep_span(table: &str) -> Span {
    tracing::info_span!("session.gc", session.table = table, gc.deleted = tracing::field::Empty)
}

/// Record the number of deleted sessions on the current GC span.
pub fn record_gc_result(deleted: usize) {
    Span::current().record("gc.deleted", deleted as u64);
}
