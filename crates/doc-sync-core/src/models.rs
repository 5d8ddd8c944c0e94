//! Data types shared by every layer of doc-sync.
//!
//! A [`RemoteDocument`] is what the remote store hands out, a
//! [`WriteRequest`] is what the updater sends back, and a [`Backup`] is the
//! snapshot persisted locally before every write attempt.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A version-tracked document held by a remote store (e.g. a wiki page).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Opaque, stable identifier (a Confluence page ID, for instance).
    pub id: String,
    /// Version assigned by the remote; each accepted write adds exactly 1.
    pub version: u64,
    /// Full body payload.
    pub content: String,
    /// Display title, echoed back on writes by stores that require it.
    #[serde(default)]
    pub title: Option<String>,
}

impl RemoteDocument {
    pub fn new(id: impl Into<String>, version: u64, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version,
            content: content.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A conditional write: accepted only if the remote is still at `base_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub document_id: String,
    /// The version the new content was derived from.
    pub base_version: u64,
    pub content: String,
    pub title: Option<String>,
    /// Human-readable change description for the remote's history.
    pub message: Option<String>,
}

/// Remote acknowledgement of an accepted write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAck {
    pub new_version: u64,
}

/// Immutable snapshot of a document taken right before a write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub document_id: String,
    /// The version the pending write would replace.
    pub version: u64,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    pub taken_at: DateTime<Utc>,
}

impl Backup {
    /// Snapshot `doc` as of now.
    pub fn of(doc: &RemoteDocument) -> Self {
        Self {
            document_id: doc.id.clone(),
            version: doc.version,
            title: doc.title.clone(),
            content: doc.content.clone(),
            taken_at: Utc::now(),
        }
    }
}

/// How a single attempt of an update operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Conflict,
    TransientFailure,
    PermanentFailure,
}

/// Record of one fetch/backup/write cycle. Reported, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateAttempt {
    /// 1-based.
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// Delay slept after this attempt before the next one, if any.
    pub backoff_delay_applied: Option<Duration>,
}
