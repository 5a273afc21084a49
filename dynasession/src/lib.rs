//! # dynasession
//!
//! Distributed web-session storage over a key-value store, with optional
//! pessimistic locking and garbage collection of abandoned sessions.
//!
//! ## Overview
//!
//! - [`SessionStore`] - Load, save and delete sessions for a request
//! - [`SessionTable`] - Typed operations on session records
//! - [`LockStrategy`] - [`NullLocking`] (last write wins) or [`PessimisticLocking`]
//! - [`GarbageCollector`] - Batch deletion of expired sessions
//! - [`ErrorHandler`] - Decides whether store failures abort the request
//!
//! ## Quick Start
//!
//! ```no_run
//! use dynasession::SessionStore;
//! use dynasession_core::SessionConfig;
//! use dynasession_store::InMemoryItemStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> dynasession_core::Result<()> {
//! let config = SessionConfig::default()
//!     .with_locking(true)
//!     .with_lock_expiry_time(Duration::from_secs(2));
//! let store = SessionStore::new(config, Arc::new(InMemoryItemStore::new()))?;
//!
//! let session = store.load(Some("0f3a9c")).await?;
//! store.save(session).await?;
//!
//! let deleted = store.garbage_collector().collect(Duration::from_secs(86_400), 25).await?;
//! # Ok(())
//! # }
//! ```

pub mod gc;
pub mod handler;
pub mod locking;
pub mod store;
pub mod table;

pub use gc::{ExpiryPolicy, GarbageCollector};
pub use handler::{DefaultErrorHandler, ErrorHandler, Verdict};
pub use locking::{Acquired, LockStrategy, NullLocking, PessimisticLocking};
pub use store::{LoadedSession, SessionData, SessionStore, SessionStoreBuilder};
pub use table::SessionTable;
