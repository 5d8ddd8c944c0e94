//! # Doc Sync CLI (`dsync`)
//!
//! Publishes changes to version-tracked Confluence pages without clobbering
//! concurrent edits. Every write takes a per-page lock, backs up the page it
//! replaces, and is sent conditionally on the version you expect.
//!
//! ## Usage
//!
//! ```bash
//! dsync --config ./config/dsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsync get <id>` | Show a page's title, version and storage body |
//! | `dsync publish <id> --file F` | Replace the page body with a local file |
//! | `dsync replace <id> --find A --with B` | Literal find/replace in the page body |
//! | `dsync rollback <id>` | Restore the newest (or a given) local backup |
//! | `dsync backups list <id>` | List local backups, newest first |
//! | `dsync backups prune <id> --keep K` | Delete all but the newest K backups |
//! | `dsync history <id>` | Show the local audit trail of writes |
//!
//! ## Examples
//!
//! ```bash
//! # Publish against a known version; fails if someone edited since
//! dsync publish 83951683 --file fm.xhtml --expected-version 41 \
//!     --revision 1.0.7 --message "Updated section 3"
//!
//! # Undo the last publish
//! dsync rollback 83951683
//! ```
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `dsync=info,doc_sync=info`).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use doc_sync::audit::AuditLog;
use doc_sync::backup::BackupStore;
use doc_sync::commands::{self, WriteOptions};
use doc_sync::config;
use doc_sync::SafeUpdater;

/// Doc Sync CLI: lock, back up and conditionally update remote documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dsync.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "dsync", version, about)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/dsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a page's current version and content
    Get {
        /// Page ID
        id: String,
    },
    /// Replace a page's body with the contents of a file
    Publish {
        /// Page ID
        id: String,
        /// File holding the new storage-format body
        #[arg(long)]
        file: PathBuf,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Replace every literal occurrence of a string in a page
    Replace {
        /// Page ID
        id: String,
        /// Text to look for
        #[arg(long)]
        find: String,
        /// Replacement text
        #[arg(long = "with")]
        replacement: String,
        #[command(flatten)]
        write: WriteArgs,
    },
    /// Restore a page from a local backup
    Rollback {
        /// Page ID
        id: String,
        /// Backup file to restore (defaults to the newest one)
        #[arg(long)]
        backup: Option<PathBuf>,
        /// Version the page must currently be at
        #[arg(long)]
        expected_version: Option<u64>,
    },
    /// Inspect or prune local backups
    Backups {
        #[command(subcommand)]
        action: BackupsAction,
    },
    /// Show the local audit trail for a page
    History {
        /// Page ID
        id: String,
    },
}

#[derive(clap::Args)]
struct WriteArgs {
    /// Version the page must currently be at (read from the remote if omitted)
    #[arg(long)]
    expected_version: Option<u64>,
    /// Version comment stored in the page history
    #[arg(long, short)]
    message: Option<String>,
    /// Document revision, rendered as an `[FM <rev>]` prefix on the comment
    #[arg(long)]
    revision: Option<String>,
    /// Name recorded in the audit trail
    #[arg(long)]
    agent: Option<String>,
}

impl From<WriteArgs> for WriteOptions {
    fn from(args: WriteArgs) -> Self {
        WriteOptions {
            expected_version: args.expected_version,
            message: args.message,
            revision: args.revision,
            agent: args.agent,
        }
    }
}

#[derive(Subcommand)]
enum BackupsAction {
    /// List backups, newest first
    List {
        /// Page ID
        id: String,
    },
    /// Delete all but the newest backups
    Prune {
        /// Page ID
        id: String,
        /// Number of backups to keep
        #[arg(long)]
        keep: usize,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dsync=info,doc_sync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Get { id } => {
            let updater = SafeUpdater::from_config(&cfg)?;
            commands::run_get(&updater, &id).await?;
        }
        Commands::Publish { id, file, write } => {
            let updater = SafeUpdater::from_config(&cfg)?;
            commands::run_publish(&updater, &id, &file, &write.into()).await?;
        }
        Commands::Replace {
            id,
            find,
            replacement,
            write,
        } => {
            let updater = SafeUpdater::from_config(&cfg)?;
            commands::run_replace(&updater, &id, &find, &replacement, &write.into()).await?;
        }
        Commands::Rollback {
            id,
            backup,
            expected_version,
        } => {
            let updater = SafeUpdater::from_config(&cfg)?;
            let opts = WriteOptions {
                expected_version,
                ..WriteOptions::default()
            };
            commands::run_rollback(&updater, &id, backup.as_deref(), &opts).await?;
        }
        Commands::Backups { action } => {
            let backups = BackupStore::new(&cfg.backup.dir);
            match action {
                BackupsAction::List { id } => commands::run_backups_list(&backups, &id)?,
                BackupsAction::Prune { id, keep } => {
                    commands::run_backups_prune(&backups, &id, keep)?
                }
            }
        }
        Commands::History { id } => {
            commands::run_history(&AuditLog::new(&cfg.audit.dir), &id)?;
        }
    }

    Ok(())
}
