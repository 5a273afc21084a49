//! # dynasession-store
//!
//! The store-client boundary of dynasession: a minimal key-value interface
//! with get, conditional put/update, delete and paginated scan.
//!
//! - [`InMemoryItemStore`] - in-process backend for tests and single-node use
//! - `DynamoDbItemStore` - Amazon DynamoDB backend (`dynamodb` feature)
//!
//! A backend without atomic conditional writes cannot support pessimistic
//! locking; run such stores with locking disabled.

pub mod client;
pub mod inmemory;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

pub use client::{Condition, ItemStore, RecordUpdate, ScanFilter, ScanPage, StoreResult};
pub use inmemory::{InMemoryItemStore, StoreStats};

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoDbItemStore;
