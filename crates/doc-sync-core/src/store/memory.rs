//! In-memory [`RemoteStore`] implementation for tests and embedding.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Writes follow the same
//! optimistic-concurrency rule a wiki API enforces: a stale base version is
//! rejected with [`StoreError::Conflict`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::RemoteStore;
use crate::error::StoreError;
use crate::models::{RemoteDocument, WriteAck, WriteRequest};

pub struct InMemoryRemoteStore {
    docs: RwLock<HashMap<String, RemoteDocument>>,
    writes: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Create or overwrite a document, bypassing the version check.
    ///
    /// Models an edit made outside of the updater (another user, another
    /// host).
    pub fn insert(&self, doc: RemoteDocument) {
        let mut docs = self.docs.write().unwrap();
        docs.insert(doc.id.clone(), doc);
    }

    /// Apply an external edit: replace content and bump the version.
    pub fn external_edit(&self, document_id: &str, content: &str) -> Option<u64> {
        let mut docs = self.docs.write().unwrap();
        let doc = docs.get_mut(document_id)?;
        doc.version = doc.version.checked_add(1)?;
        doc.content = content.to_string();
        Some(doc.version)
    }

    pub fn get(&self, document_id: &str) -> Option<RemoteDocument> {
        self.docs.read().unwrap().get(document_id).cloned()
    }

    /// Number of write calls received, accepted or not.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, document_id: &str) -> Result<RemoteDocument, StoreError> {
        self.get(document_id)
            .ok_or_else(|| StoreError::NotFound(document_id.to_string()))
    }

    async fn write(&self, request: &WriteRequest) -> Result<WriteAck, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut docs = self.docs.write().unwrap();
        let doc = docs
            .get_mut(&request.document_id)
            .ok_or_else(|| StoreError::NotFound(request.document_id.clone()))?;

        if doc.version != request.base_version {
            return Err(StoreError::Conflict {
                document_id: request.document_id.clone(),
                expected: request.base_version,
                found: Some(doc.version),
            });
        }

        doc.version = doc.version.checked_add(1).ok_or_else(|| {
            StoreError::InvalidRequest(format!(
                "{} is at version {}, which cannot be incremented",
                request.document_id, doc.version
            ))
        })?;
        doc.content = request.content.clone();
        if request.title.is_some() {
            doc.title = request.title.clone();
        }
        Ok(WriteAck {
            new_version: doc.version,
        })
    }
}
