//! Implementations of the `dsync` subcommands.
//!
//! Each `run_*` function performs one command against an already-built
//! [`SafeUpdater`] (or local store) and prints its result to stdout. Keeping
//! them out of `main.rs` lets tests drive them with an in-memory remote.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::audit::AuditLog;
use crate::backup::BackupStore;
use crate::updater::{SafeUpdater, UpdateReport, UpdateRequest};

/// Options shared by every command that writes.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Skip the initial read and write against this version.
    pub expected_version: Option<u64>,
    pub message: Option<String>,
    pub revision: Option<String>,
    pub agent: Option<String>,
}

impl WriteOptions {
    async fn request(&self, updater: &SafeUpdater, document_id: &str) -> Result<UpdateRequest> {
        let expected_version = match self.expected_version {
            Some(v) => v,
            None => updater.fetch(document_id).await?.version,
        };
        let mut request = UpdateRequest::new(document_id, expected_version);
        if let Some(message) = &self.message {
            request = request.message(message.clone());
        }
        if let Some(revision) = &self.revision {
            request = request.revision_label(revision.clone());
        }
        if let Some(agent) = &self.agent {
            request = request.agent(agent.clone());
        }
        Ok(request)
    }
}

pub async fn run_get(updater: &SafeUpdater, document_id: &str) -> Result<()> {
    let doc = updater.fetch(document_id).await?;
    println!("--- Document ---");
    println!("id:      {}", doc.id);
    println!("title:   {}", doc.title.as_deref().unwrap_or("(untitled)"));
    println!("version: {}", doc.version);
    println!("length:  {} chars", doc.content.chars().count());
    println!();
    println!("{}", doc.content);
    Ok(())
}

/// Replace the whole document body with the contents of `file`.
pub async fn run_publish(
    updater: &SafeUpdater,
    document_id: &str,
    file: &Path,
    opts: &WriteOptions,
) -> Result<UpdateReport> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    if body.trim().is_empty() {
        bail!("{} is empty; refusing to publish an empty page", file.display());
    }

    let request = opts.request(updater, document_id).await?;
    let report = updater.update(&request, |_| body.clone()).await?;
    print_report("Published", &report);
    Ok(report)
}

/// Literal find/replace on the remote content.
pub async fn run_replace(
    updater: &SafeUpdater,
    document_id: &str,
    find: &str,
    with: &str,
    opts: &WriteOptions,
) -> Result<Option<UpdateReport>> {
    if find.is_empty() {
        bail!("--find must not be empty");
    }

    let current = updater.fetch(document_id).await?;
    let occurrences = current.content.matches(find).count();
    if occurrences == 0 {
        println!("No occurrences of {:?} in {}; nothing to do.", find, document_id);
        return Ok(None);
    }

    let opts = WriteOptions {
        expected_version: Some(opts.expected_version.unwrap_or(current.version)),
        message: Some(
            opts.message
                .clone()
                .unwrap_or_else(|| format!("Replace {:?} with {:?}", find, with)),
        ),
        ..opts.clone()
    };
    let request = opts.request(updater, document_id).await?;
    let report = updater
        .update(&request, |content| content.replace(find, with))
        .await?;
    println!("Replaced {} occurrence(s).", occurrences);
    print_report("Updated", &report);
    Ok(Some(report))
}

/// Restore `backup_path`, or the newest backup when `None`.
pub async fn run_rollback(
    updater: &SafeUpdater,
    document_id: &str,
    backup_path: Option<&Path>,
    opts: &WriteOptions,
) -> Result<UpdateReport> {
    let stored = match backup_path {
        Some(path) => updater.backups().load(path)?,
        None => updater
            .backups()
            .latest(document_id)?
            .with_context(|| format!("No backup available for {}", document_id))?,
    };

    let expected_version = match opts.expected_version {
        Some(v) => v,
        None => updater.fetch(document_id).await?.version,
    };
    let agent = opts.agent.as_deref().unwrap_or("dsync");

    let report = updater
        .rollback(document_id, &stored.backup, expected_version, agent)
        .await?;
    println!(
        "Rolled back {} to the content of version {} ({}).",
        document_id,
        stored.backup.version,
        stored.path.display()
    );
    print_report("Updated", &report);
    Ok(report)
}

pub fn run_backups_list(backups: &BackupStore, document_id: &str) -> Result<()> {
    let list = backups.list(document_id)?;
    if list.is_empty() {
        println!("No backups for {}.", document_id);
        return Ok(());
    }

    println!("{:<8} {:<28} {:>8}  PATH", "VERSION", "TAKEN AT", "CHARS");
    for stored in &list {
        println!(
            "{:<8} {:<28} {:>8}  {}",
            stored.backup.version,
            stored.backup.taken_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            stored.backup.content.chars().count(),
            stored.path.display()
        );
    }
    println!("{} backup(s).", list.len());
    Ok(())
}

pub fn run_backups_prune(backups: &BackupStore, document_id: &str, keep: usize) -> Result<()> {
    let removed = backups.prune(document_id, keep)?;
    println!(
        "Removed {} backup(s) of {}, kept the newest {}.",
        removed, document_id, keep
    );
    Ok(())
}

pub fn run_history(audit: &AuditLog, document_id: &str) -> Result<()> {
    let entries = audit.entries(document_id)?;
    if entries.is_empty() {
        println!("No recorded writes for {}.", document_id);
        return Ok(());
    }

    for entry in &entries {
        println!(
            "{}  v{:<6} {:<9} {:<12} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.version,
            entry.action.to_string(),
            entry.agent,
            entry.message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_report(verb: &str, report: &UpdateReport) {
    println!(
        "{} {}: version {} -> {} ({} attempt(s)).",
        verb,
        report.document_id,
        report.previous_version,
        report.new_version,
        report.attempts.len()
    );
    if let Some(backup) = report.backups.last() {
        println!("Backup: {}", backup.path.display());
    }
    if report.recovered_lost_ack {
        println!("Note: the write was confirmed by re-reading the page after a lost response.");
    }
}
