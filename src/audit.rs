//! Append-only audit trail of remote writes.
//!
//! One JSON line per acknowledged write, in `<audit_dir>/<key>.jsonl`:
//!
//! ```json
//! {"timestamp":"2026-10-19T09:12:44Z","document_id":"83951683","action":"update","agent":"dsync","message":"Updated section 3","version":42,"pid":4711}
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::file_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Update,
    Rollback,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Update => f.write_str("update"),
            AuditAction::Rollback => f.write_str("rollback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub document_id: String,
    pub action: AuditAction,
    pub agent: String,
    pub message: Option<String>,
    /// Version the write produced.
    pub version: u64,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", file_key(document_id)))
    }

    pub fn record(
        &self,
        document_id: &str,
        action: AuditAction,
        agent: &str,
        message: Option<&str>,
        version: u64,
    ) -> Result<AuditEntry> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            document_id: document_id.to_string(),
            action,
            agent: agent.to_string(),
            message: message.map(str::to_string),
            version,
            pid: std::process::id(),
        };
        self.append(&entry)?;
        Ok(entry)
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create audit directory {}", self.dir.display()))?;

        let path = self.log_path(&entry.document_id);
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        // Single write per line so concurrent appenders do not interleave.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to audit log {}", path.display()))?;
        Ok(())
    }

    /// All entries for a document, oldest first. Malformed lines are skipped.
    pub fn entries(&self, document_id: &str) -> Result<Vec<AuditEntry>> {
        let path = self.log_path(document_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read audit log {}", path.display()))?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
