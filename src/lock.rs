//! Host-local, per-document locking.
//!
//! Each document gets an advisory lock file at `<lock_dir>/<key>.lock`
//! (see [`crate::keys::file_key`]). The lock is taken with a non-blocking
//! `flock`-style exclusive lock via `fs2`, polled until the configured
//! timeout expires.
//!
//! Every acquisition opens its own file handle, so the lock serializes
//! separate processes as well as tasks and threads of one process.
//!
//! # Release
//!
//! [`ScopedLock`] releases on `Drop`, i.e. on every exit path of the owning
//! operation. If the process dies, the OS drops the lock with the file
//! descriptor. The lock file itself is never deleted: removing it while a
//! waiter holds an open handle would let two processes "own" different
//! inodes under the same name.
//!
//! Locking is single-host only. Writers on other machines are caught by the
//! remote version check instead.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::keys::file_key;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("document id must not be empty")]
    InvalidDocumentId,

    #[error("could not lock document {document_id} within {waited:?}; another update may be in progress")]
    Timeout {
        document_id: String,
        waited: Duration,
    },

    #[error("lock file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Owner metadata written into a held lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOwner {
    pub document_id: String,
    pub acquired_at: DateTime<Utc>,
    pub pid: u32,
}

/// Hands out [`ScopedLock`]s for documents.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl LockManager {
    /// `timeout` of zero means fail fast: a single non-blocking try.
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn lock_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", file_key(document_id)))
    }

    /// Acquire the exclusive lock for `document_id`, waiting up to the
    /// configured timeout.
    pub async fn acquire(&self, document_id: &str) -> Result<ScopedLock, LockError> {
        if document_id.trim().is_empty() {
            return Err(LockError::InvalidDocumentId);
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.lock_path(document_id);
        let start = Instant::now();

        loop {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| LockError::Io {
                    path: path.clone(),
                    source,
                })?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    let owner = LockOwner {
                        document_id: document_id.to_string(),
                        acquired_at: Utc::now(),
                        pid: std::process::id(),
                    };
                    write_owner(&file, &owner).map_err(|source| LockError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    info!(document_id, waited_ms = start.elapsed().as_millis() as u64, "lock acquired");
                    return Ok(ScopedLock { file, path, owner });
                }
                Err(e) if is_contended(&e) => {
                    let waited = start.elapsed();
                    if waited >= self.timeout {
                        return Err(LockError::Timeout {
                            document_id: document_id.to_string(),
                            waited,
                        });
                    }
                    debug!(document_id, "lock busy, retrying");
                    tokio::time::sleep(self.poll_interval.min(self.timeout - waited)).await;
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }
        }
    }

    /// Read the owner metadata of a lock file, if any was written.
    pub fn owner(&self, document_id: &str) -> Option<LockOwner> {
        let content = std::fs::read_to_string(self.lock_path(document_id)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn write_owner(mut file: &File, owner: &LockOwner) -> io::Result<()> {
    let json = serde_json::to_string(owner).map_err(io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.flush()
}

/// An exclusive lock on one document, released when dropped.
#[derive(Debug)]
pub struct ScopedLock {
    file: File,
    path: PathBuf,
    owner: LockOwner,
}

impl ScopedLock {
    pub fn document_id(&self) -> &str {
        &self.owner.document_id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.owner.acquired_at
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(document_id = %self.owner.document_id, "lock released");
    }
}
