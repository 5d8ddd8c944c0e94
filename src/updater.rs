//! Safe remote document updates: lock, backup, conditional write, retry.
//!
//! [`SafeUpdater::update`] drives one update operation through
//!
//! ```text
//! START ─▶ LOCKED ─▶ FETCHING ─┬─▶ CONFLICT                    (terminal)
//!                      ▲       └─▶ BACKED_UP ─▶ WRITING ─┬─▶ SUCCESS (terminal)
//!                      │                                 ├─▶ FAILED  (terminal)
//!                      └──────────── RETRY ◀─────────────┘
//! ```
//!
//! - **LOCKED**: the per-document [`ScopedLock`](crate::lock::ScopedLock) is
//!   held for the whole operation and dropped on every exit path.
//! - **FETCHING**: the current remote state is re-read on every attempt. A
//!   version other than the caller's `expected_version` is a conflict; no
//!   auto-merge is attempted.
//! - **BACKED_UP**: the fetched state is persisted before anything is sent.
//!   A failed snapshot aborts the operation.
//! - **WRITING**: `mutate` is applied to the freshly fetched content and the
//!   result is written conditionally on the fetched version.
//!
//! `mutate` must be pure: it is re-invoked for every attempt instead of
//! replaying content computed from stale state.
//!
//! A write that fails transiently may still have been applied remotely. If
//! the next fetch shows exactly `expected_version + 1` carrying the content
//! we sent, the operation completes without writing again. When the final
//! attempt's write fails that way, one extra fetch checks the same thing
//! before the operation gives up.
//!
//! Cancellation is checked between transitions. A write the remote already
//! acknowledged cannot be undone by cancelling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use doc_sync_core::{
    AttemptOutcome, Backup, RemoteDocument, RemoteStore, RetryPolicy, StoreError, UpdateAttempt,
    WriteRequest,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditLog};
use crate::backup::{BackupStore, StoredBackup};
use crate::config::Config;
use crate::connector_confluence::ConfluenceStore;
use crate::lock::{LockError, LockManager};

const DEFAULT_AGENT: &str = "dsync";

/// What to update and how to label the change.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub document_id: String,
    /// Version the caller last saw; the write only goes ahead against it.
    pub expected_version: u64,
    pub message: Option<String>,
    /// Document revision (e.g. `1.0.7`), rendered as an `[FM <rev>]` prefix.
    pub revision_label: Option<String>,
    pub agent: String,
}

impl UpdateRequest {
    pub fn new(document_id: impl Into<String>, expected_version: u64) -> Self {
        Self {
            document_id: document_id.into(),
            expected_version,
            message: None,
            revision_label: None,
            agent: DEFAULT_AGENT.to_string(),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn revision_label(mut self, revision: impl Into<String>) -> Self {
        self.revision_label = Some(revision.into());
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Message stored in the remote's version history.
    pub fn version_message(&self) -> Option<String> {
        match (&self.revision_label, &self.message) {
            (Some(rev), Some(msg)) => Some(format!("[FM {rev}] {msg}")),
            (Some(rev), None) => Some(format!("[FM {rev}]")),
            (None, msg) => msg.clone(),
        }
    }
}

/// Result of a successful update.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub document_id: String,
    pub previous_version: u64,
    pub new_version: u64,
    pub content: String,
    /// One per write attempt, oldest first.
    pub backups: Vec<StoredBackup>,
    pub attempts: Vec<UpdateAttempt>,
    /// The final write's acknowledgement was lost and recovered by re-fetch.
    pub recovered_lost_ack: bool,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("document id must not be empty")]
    InvalidDocumentId,

    #[error("backup belongs to document {backup_document_id}, not {document_id}")]
    BackupMismatch {
        document_id: String,
        backup_document_id: String,
    },

    #[error("timed out after {waited:?} waiting for the lock on {document_id}")]
    LockTimeout {
        document_id: String,
        waited: Duration,
    },

    #[error("could not lock {document_id}: {source}")]
    Lock {
        document_id: String,
        #[source]
        source: LockError,
    },

    #[error("backup of {document_id} failed, nothing was written: {source:#}")]
    Backup {
        document_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{document_id} changed remotely: expected version {expected}, found {}", describe_found(.found))]
    Conflict {
        document_id: String,
        expected: u64,
        found: Option<u64>,
        attempts: u32,
    },

    #[error("update of {document_id} failed after {attempts} attempt(s): {source}")]
    PermanentFailure {
        document_id: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("update of {document_id} gave up after {attempts} attempt(s): {last_error}")]
    RetryBudgetExhausted {
        document_id: String,
        attempts: u32,
        last_error: StoreError,
    },

    #[error("update of {document_id} cancelled after {attempts} attempt(s)")]
    Cancelled { document_id: String, attempts: u32 },
}

fn describe_found(found: &Option<u64>) -> String {
    match found {
        Some(v) => v.to_string(),
        None => "a newer one".to_string(),
    }
}

impl UpdateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, UpdateError::Conflict { .. })
    }

    /// Whether re-running the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpdateError::LockTimeout { .. } | UpdateError::RetryBudgetExhausted { .. }
        )
    }

    /// Attempts made before the operation ended (0 if none started).
    pub fn attempts(&self) -> u32 {
        match self {
            UpdateError::Conflict { attempts, .. }
            | UpdateError::PermanentFailure { attempts, .. }
            | UpdateError::RetryBudgetExhausted { attempts, .. }
            | UpdateError::Cancelled { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// Cooperative cancellation flag shared between a caller and an operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SafeUpdater {
    store: Arc<dyn RemoteStore>,
    locks: LockManager,
    backups: BackupStore,
    retry: RetryPolicy,
    audit: Option<AuditLog>,
}

impl SafeUpdater {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        locks: LockManager,
        backups: BackupStore,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            locks,
            backups,
            retry,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Build an updater talking to Confluence as described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = ConfluenceStore::from_config(config)?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Build an updater from `config` around an arbitrary store.
    pub fn with_store(config: &Config, store: Arc<dyn RemoteStore>) -> Self {
        let updater = Self::new(
            store,
            LockManager::new(
                &config.lock.dir,
                config.lock_timeout(),
                config.lock_poll_interval(),
            ),
            BackupStore::new(&config.backup.dir),
            config.retry_policy(),
        );
        if config.audit.enabled {
            updater.with_audit(AuditLog::new(&config.audit.dir))
        } else {
            updater
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn audit(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Read a document, retrying transient failures. Takes no lock.
    pub async fn fetch(&self, document_id: &str) -> Result<RemoteDocument, UpdateError> {
        if document_id.trim().is_empty() {
            return Err(UpdateError::InvalidDocumentId);
        }
        let mut attempt_number = 1;
        loop {
            match self.store.fetch(document_id).await {
                Ok(doc) => return Ok(doc),
                Err(err) if self.retry.should_retry(attempt_number, &err) => {
                    let delay = self.retry.delay_for(attempt_number);
                    warn!(document_id, attempt = attempt_number, delay_ms = delay.as_millis() as u64, error = %err, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt_number += 1;
                }
                Err(err) => return Err(terminal_error(document_id, attempt_number, err)),
            }
        }
    }

    /// Apply `mutate` to the document and write the result safely.
    pub async fn update<F>(
        &self,
        request: &UpdateRequest,
        mutate: F,
    ) -> Result<UpdateReport, UpdateError>
    where
        F: Fn(&str) -> String + Send + Sync,
    {
        self.run(request, mutate, AuditAction::Update, &CancelToken::new())
            .await
    }

    /// [`update`](Self::update) that stops between transitions once
    /// `cancel` is set.
    pub async fn update_with_cancel<F>(
        &self,
        request: &UpdateRequest,
        mutate: F,
        cancel: &CancelToken,
    ) -> Result<UpdateReport, UpdateError>
    where
        F: Fn(&str) -> String + Send + Sync,
    {
        self.run(request, mutate, AuditAction::Update, cancel).await
    }

    /// Restore a backup's content through the same safe path.
    ///
    /// The current remote state is itself backed up first, so a rollback can
    /// be rolled back.
    pub async fn rollback(
        &self,
        document_id: &str,
        backup: &Backup,
        expected_version: u64,
        agent: &str,
    ) -> Result<UpdateReport, UpdateError> {
        if backup.document_id != document_id {
            return Err(UpdateError::BackupMismatch {
                document_id: document_id.to_string(),
                backup_document_id: backup.document_id.clone(),
            });
        }
        let request = UpdateRequest::new(document_id, expected_version)
            .message(format!("ROLLBACK to version {}", backup.version))
            .agent(agent);
        let content = backup.content.clone();
        let report = self
            .run(
                &request,
                move |_: &str| content.clone(),
                AuditAction::Rollback,
                &CancelToken::new(),
            )
            .await?;
        info!(document_id, restored_version = backup.version, new_version = report.new_version, "rollback complete");
        Ok(report)
    }

    async fn run<F>(
        &self,
        request: &UpdateRequest,
        mutate: F,
        action: AuditAction,
        cancel: &CancelToken,
    ) -> Result<UpdateReport, UpdateError>
    where
        F: Fn(&str) -> String + Send + Sync,
    {
        let document_id = request.document_id.as_str();
        if document_id.trim().is_empty() {
            return Err(UpdateError::InvalidDocumentId);
        }
        check_cancel(cancel, document_id, 0)?;

        let _lock = self
            .locks
            .acquire(document_id)
            .await
            .map_err(|e| match e {
                LockError::Timeout {
                    document_id,
                    waited,
                } => UpdateError::LockTimeout {
                    document_id,
                    waited,
                },
                LockError::InvalidDocumentId => UpdateError::InvalidDocumentId,
                other => UpdateError::Lock {
                    document_id: document_id.to_string(),
                    source: other,
                },
            })?;

        let expected = request.expected_version;
        let message = request.version_message();
        let mut attempts: Vec<UpdateAttempt> = Vec::new();
        let mut backups: Vec<StoredBackup> = Vec::new();
        // Content of a write whose outcome is unknown (transient failure).
        let mut in_doubt: Option<String> = None;
        let mut attempt_number = 0;

        // Every path out of an attempt either returns or retries, and
        // `after_failure` stops retrying once the attempt budget is spent.
        loop {
            attempt_number += 1;
            check_cancel(cancel, document_id, attempt_number - 1)?;
            let started_at = Utc::now();
            debug!(document_id, attempt = attempt_number, "fetching");

            let current = match self.store.fetch(document_id).await {
                Ok(doc) => doc,
                Err(err) => {
                    let delay = self
                        .after_failure(document_id, attempt_number, &err, cancel)
                        .await?;
                    attempts.push(UpdateAttempt {
                        attempt_number,
                        started_at,
                        outcome: outcome_of(&err),
                        backoff_delay_applied: delay,
                    });
                    match delay {
                        Some(_) => continue,
                        None => return Err(terminal_error(document_id, attempt_number, err)),
                    }
                }
            };

            if current.version != expected {
                if landed(&current, expected, in_doubt.as_deref()) {
                    info!(document_id, version = current.version, "previous write was applied, acknowledgement lost");
                    attempts.push(UpdateAttempt {
                        attempt_number,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        backoff_delay_applied: None,
                    });
                    return Ok(self.recovered(request, action, message.as_deref(), current, backups, attempts));
                }

                warn!(document_id, expected, found = current.version, "remote version moved, not writing");
                return Err(UpdateError::Conflict {
                    document_id: document_id.to_string(),
                    expected,
                    found: Some(current.version),
                    attempts: attempt_number,
                });
            }

            check_cancel(cancel, document_id, attempt_number - 1)?;
            let stored = self
                .backups
                .snapshot(&current)
                .map_err(|source| UpdateError::Backup {
                    document_id: document_id.to_string(),
                    source,
                })?;
            backups.push(stored);

            let new_content = mutate(&current.content);
            check_cancel(cancel, document_id, attempt_number - 1)?;

            let write = WriteRequest {
                document_id: document_id.to_string(),
                base_version: current.version,
                content: new_content,
                title: current.title.clone(),
                message: message.clone(),
            };
            info!(document_id, attempt = attempt_number, base_version = current.version, store = self.store.kind(), "writing");

            match self.store.write(&write).await {
                Ok(ack) => {
                    if expected.checked_add(1) != Some(ack.new_version) {
                        warn!(document_id, expected, acknowledged = ack.new_version, "remote reported an unexpected version");
                    }
                    attempts.push(UpdateAttempt {
                        attempt_number,
                        started_at,
                        outcome: AttemptOutcome::Success,
                        backoff_delay_applied: None,
                    });
                    self.record_audit(request, action, message.as_deref(), ack.new_version);
                    info!(document_id, new_version = ack.new_version, attempts = attempt_number, "update complete");
                    return Ok(UpdateReport {
                        document_id: document_id.to_string(),
                        previous_version: expected,
                        new_version: ack.new_version,
                        content: write.content,
                        backups,
                        attempts,
                        recovered_lost_ack: false,
                    });
                }
                Err(StoreError::Conflict { found, .. }) => {
                    warn!(document_id, expected, "write rejected as stale");
                    return Err(UpdateError::Conflict {
                        document_id: document_id.to_string(),
                        expected,
                        found,
                        attempts: attempt_number,
                    });
                }
                Err(err) => {
                    if err.is_transient() {
                        in_doubt = Some(write.content);
                    }
                    let delay = self
                        .after_failure(document_id, attempt_number, &err, cancel)
                        .await?;
                    if delay.is_some() {
                        attempts.push(UpdateAttempt {
                            attempt_number,
                            started_at,
                            outcome: outcome_of(&err),
                            backoff_delay_applied: delay,
                        });
                        continue;
                    }

                    // Out of attempts: a transiently failed write may still
                    // have landed.
                    let confirmed = if err.is_transient() {
                        self.confirm_landed(document_id, expected, in_doubt.as_deref())
                            .await
                    } else {
                        None
                    };
                    if let Some(current) = confirmed {
                        info!(document_id, version = current.version, "final write was applied, acknowledgement lost");
                        attempts.push(UpdateAttempt {
                            attempt_number,
                            started_at,
                            outcome: AttemptOutcome::Success,
                            backoff_delay_applied: None,
                        });
                        return Ok(self.recovered(request, action, message.as_deref(), current, backups, attempts));
                    }

                    attempts.push(UpdateAttempt {
                        attempt_number,
                        started_at,
                        outcome: outcome_of(&err),
                        backoff_delay_applied: None,
                    });
                    return Err(terminal_error(document_id, attempt_number, err));
                }
            }
        }
    }

    /// One unretried fetch to check whether an unacknowledged write landed.
    async fn confirm_landed(
        &self,
        document_id: &str,
        expected: u64,
        in_doubt: Option<&str>,
    ) -> Option<RemoteDocument> {
        if in_doubt.is_none() {
            return None;
        }
        match self.store.fetch(document_id).await {
            Ok(current) if landed(&current, expected, in_doubt) => Some(current),
            Ok(_) => None,
            Err(err) => {
                warn!(document_id, error = %err, "could not verify the final write");
                None
            }
        }
    }

    fn recovered(
        &self,
        request: &UpdateRequest,
        action: AuditAction,
        message: Option<&str>,
        current: RemoteDocument,
        backups: Vec<StoredBackup>,
        attempts: Vec<UpdateAttempt>,
    ) -> UpdateReport {
        self.record_audit(request, action, message, current.version);
        UpdateReport {
            document_id: request.document_id.clone(),
            previous_version: request.expected_version,
            new_version: current.version,
            content: current.content,
            backups,
            attempts,
            recovered_lost_ack: true,
        }
    }

    /// Decide whether to retry after a failed attempt; sleeps the backoff
    /// delay and returns it if so.
    async fn after_failure(
        &self,
        document_id: &str,
        attempt_number: u32,
        err: &StoreError,
        cancel: &CancelToken,
    ) -> Result<Option<Duration>, UpdateError> {
        if !self.retry.should_retry(attempt_number, err) {
            warn!(document_id, attempt = attempt_number, error = %err, "giving up");
            return Ok(None);
        }
        check_cancel(cancel, document_id, attempt_number)?;
        let delay = self.retry.delay_for(attempt_number);
        warn!(
            document_id,
            attempt = attempt_number,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
        Ok(Some(delay))
    }

    fn record_audit(
        &self,
        request: &UpdateRequest,
        action: AuditAction,
        message: Option<&str>,
        version: u64,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.record(&request.document_id, action, &request.agent, message, version) {
            warn!(document_id = %request.document_id, error = %e, "failed to write audit entry");
        }
    }
}

/// The remote sits one version past `expected` carrying exactly the content
/// of our unacknowledged write.
fn landed(current: &RemoteDocument, expected: u64, in_doubt: Option<&str>) -> bool {
    current.version.checked_sub(1) == Some(expected)
        && in_doubt.is_some_and(|content| content == current.content)
}

fn check_cancel(cancel: &CancelToken, document_id: &str, attempts: u32) -> Result<(), UpdateError> {
    if cancel.is_cancelled() {
        info!(document_id, attempts, "update cancelled");
        return Err(UpdateError::Cancelled {
            document_id: document_id.to_string(),
            attempts,
        });
    }
    Ok(())
}

fn outcome_of(err: &StoreError) -> AttemptOutcome {
    if err.is_conflict() {
        AttemptOutcome::Conflict
    } else if err.is_transient() {
        AttemptOutcome::TransientFailure
    } else {
        AttemptOutcome::PermanentFailure
    }
}

fn terminal_error(document_id: &str, attempts: u32, err: StoreError) -> UpdateError {
    if err.is_transient() {
        UpdateError::RetryBudgetExhausted {
            document_id: document_id.to_string(),
            attempts,
            last_error: err,
        }
    } else {
        UpdateError::PermanentFailure {
            document_id: document_id.to_string(),
            attempts,
            source: err,
        }
    }
}
