//! # doc-sync core
//!
//! Runtime-free building blocks for safe remote document updates: data
//! models, the [`store::RemoteStore`] abstraction with its error taxonomy,
//! an in-memory store, and the shared retry/backoff policy.
//!
//! This crate contains no tokio, HTTP client, or filesystem I/O. The
//! locking, backup, and update-executor layers live in the `doc-sync`
//! crate on top of these types.

pub mod error;
pub mod models;
pub mod retry;
pub mod store;

pub use error::StoreError;
pub use models::{AttemptOutcome, Backup, RemoteDocument, UpdateAttempt, WriteAck, WriteRequest};
pub use retry::RetryPolicy;
pub use store::RemoteStore;
