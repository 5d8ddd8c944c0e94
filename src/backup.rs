//! Local, append-only backups of remote documents.
//!
//! Before every write attempt the updater hands the freshly fetched document
//! to [`BackupStore::snapshot`], which persists it as
//!
//! ```text
//! <backup_dir>/<key>/v<version>_<YYYYmmddTHHMMSS.ffffff>_<nonce>.json
//! ```
//!
//! Files are created with create-new semantics and fsynced together with
//! their directory before `snapshot` returns, so a write is never issued
//! without a durable copy of what it replaces. Nothing in the update path
//! deletes backups; retention is an operator decision ([`BackupStore::prune`]).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use doc_sync_core::{Backup, RemoteDocument};
use tracing::{debug, info};

use crate::keys::file_key;

/// A backup record together with where it lives on disk.
#[derive(Debug, Clone)]
pub struct StoredBackup {
    pub path: PathBuf,
    pub backup: Backup,
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn document_dir(&self, document_id: &str) -> PathBuf {
        self.dir.join(file_key(document_id))
    }

    /// Durably persist `doc` as a new backup record.
    pub fn snapshot(&self, doc: &RemoteDocument) -> Result<StoredBackup> {
        let backup = Backup::of(doc);
        let doc_dir = self.document_dir(&doc.id);
        fs::create_dir_all(&doc_dir)
            .with_context(|| format!("Failed to create backup directory {}", doc_dir.display()))?;

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "v{}_{}_{}.json",
            backup.version,
            backup.taken_at.format("%Y%m%dT%H%M%S%.6f"),
            &nonce[..8]
        );
        let path = doc_dir.join(file_name);

        let json = serde_json::to_vec_pretty(&backup)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create backup file {}", path.display()))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write backup file {}", path.display()))?;
        sync_dir(&doc_dir)?;

        info!(
            document_id = %doc.id,
            version = backup.version,
            path = %path.display(),
            "backup created"
        );
        Ok(StoredBackup { path, backup })
    }

    /// All backups of a document, newest first. Records found in the
    /// directory that belong to another document are skipped.
    pub fn list(&self, document_id: &str) -> Result<Vec<StoredBackup>> {
        let doc_dir = self.document_dir(document_id);
        if !doc_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&doc_dir)
            .with_context(|| format!("Failed to read backup directory {}", doc_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.load(&path) {
                Ok(stored) if stored.backup.document_id == document_id => {
                    backups.push(stored)
                }
                Ok(stored) => debug!(
                    path = %path.display(),
                    owner = %stored.backup.document_id,
                    "skipping backup of another document"
                ),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable backup"),
            }
        }

        backups.sort_by(|a, b| {
            b.backup
                .taken_at
                .cmp(&a.backup.taken_at)
                .then_with(|| b.backup.version.cmp(&a.backup.version))
        });
        Ok(backups)
    }

    pub fn latest(&self, document_id: &str) -> Result<Option<StoredBackup>> {
        Ok(self.list(document_id)?.into_iter().next())
    }

    pub fn load(&self, path: &Path) -> Result<StoredBackup> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read backup {}", path.display()))?;
        let backup: Backup = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse backup {}", path.display()))?;
        Ok(StoredBackup {
            path: path.to_path_buf(),
            backup,
        })
    }

    /// Delete all but the newest `keep` backups of a document.
    ///
    /// Returns the number of files removed. Never called by the updater.
    pub fn prune(&self, document_id: &str, keep: usize) -> Result<usize> {
        let mut removed = 0;
        for stored in self.list(document_id)?.into_iter().skip(keep) {
            fs::remove_file(&stored.path)
                .with_context(|| format!("Failed to remove backup {}", stored.path.display()))?;
            removed += 1;
        }
        if removed > 0 {
            info!(document_id, removed, keep, "pruned backups");
        }
        Ok(removed)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("Failed to sync backup directory {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
