//! # dynasession-core
//!
//! Shared types for the dynasession workspace.
//!
//! ## Overview
//!
//! - [`SessionError`] / [`ErrorKind`] / [`Result`] - Unified error handling and classification
//! - [`StoreError`] - What store backends report to the layers above
//! - [`SessionConfig`] - Immutable settings, loadable from TOML or the environment
//! - [`SessionId`] / [`SessionRecord`] / [`LockState`] / [`Lease`] - The persisted record shape
//! - [`Clock`] - Injectable time source ([`SystemClock`], [`ManualClock`])
//!
//! ## Record layout
//!
//! | attribute | meaning |
//! |---|---|
//! | `id` | partition key, opaque string |
//! | `data` | serialized session payload |
//! | `locked` | lock flag, only written when locking is enabled |
//! | `lock_acquired_at` | when the current lock was taken |
//! | `created_at` | first write |
//! | `updated_at` | last write, drives garbage collection |

pub mod clock;
pub mod config;
pub mod error;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock, to_delta};
pub use config::{ENV_PREFIX, MAX_BATCH_SIZE, SessionConfig};
pub use error::{ErrorKind, Result, SessionError, StoreError};
pub use record::{Lease, LockState, MAX_SESSION_ID_LEN, SessionId, SessionRecord};
