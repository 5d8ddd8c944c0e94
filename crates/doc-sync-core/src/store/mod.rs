//! Remote store abstraction.
//!
//! The [`RemoteStore`] trait is the only thing the update executor knows
//! about the remote system: read a document with its version, and write new
//! content conditionally on the version it was derived from. Any backend
//! honouring that optimistic-concurrency contract can be plugged in
//! (Confluence REST, in-memory, a test double with injected faults).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{RemoteDocument, WriteAck, WriteRequest};

/// Version-checked document storage.
///
/// # Contract
///
/// | Method | Guarantee |
/// |--------|-----------|
/// | [`fetch`](RemoteStore::fetch) | Returns the current version and content |
/// | [`write`](RemoteStore::write) | Applies the write only if the remote is still at `base_version`; the new version is `base_version + 1` |
///
/// A stale `base_version` must surface as [`StoreError::Conflict`], never as
/// a generic HTTP error, so callers can tell lost races from failures.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short backend name used in logs (e.g. `"confluence"`).
    fn kind(&self) -> &str;

    async fn fetch(&self, document_id: &str) -> Result<RemoteDocument, StoreError>;

    async fn write(&self, request: &WriteRequest) -> Result<WriteAck, StoreError>;
}
