//! # doc-sync
//!
//! Safe updates of version-tracked remote documents such as Confluence
//! pages.
//!
//! Every update is serialized per document on the local host, preceded by a
//! durable local backup of the state it replaces, written conditionally on
//! the version the caller expects, and retried with exponential backoff
//! when the remote fails transiently.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ LockManager │──▶│ BackupStore  │──▶│  RemoteStore  │
//! │ (fs2 flock) │   │ (JSON files) │   │ (Confluence)  │
//! └─────────────┘   └──────────────┘   └───────┬───────┘
//!         ▲                                    │
//!         └──────────── SafeUpdater ◀──────────┘
//!                      (RetryPolicy)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dsync get 83951683
//! dsync publish 83951683 --file fm.xhtml --message "Updated section 3"
//! dsync replace 83951683 --find "Draft" --with "Final"
//! dsync backups list 83951683
//! dsync rollback 83951683
//! ```
//!
//! ## Library use
//!
//! ```rust,no_run
//! # use doc_sync::config::load_config;
//! # use doc_sync::updater::{SafeUpdater, UpdateRequest};
//! # async fn example() -> anyhow::Result<()> {
//! let config = load_config(std::path::Path::new("config/dsync.toml"))?;
//! let updater = SafeUpdater::from_config(&config)?;
//!
//! let request = UpdateRequest::new("83951683", 41).message("Append changelog");
//! let report = updater
//!     .update(&request, |content| format!("{content}<p>v1.0.8</p>"))
//!     .await?;
//! assert_eq!(report.new_version, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`lock`] | Per-document advisory file locks |
//! | [`backup`] | Append-only local backups |
//! | [`audit`] | JSONL audit trail of writes |
//! | [`connector_confluence`] | Confluence REST implementation of `RemoteStore` |
//! | [`updater`] | The lock → fetch → backup → write → retry state machine |
//! | [`commands`] | `dsync` subcommand implementations |
//! | [`keys`] | Filesystem-safe names for document IDs |

pub mod audit;
pub mod backup;
pub mod commands;
pub mod config;
pub mod connector_confluence;
pub mod keys;
pub mod lock;
pub mod updater;

pub use doc_sync_core::store::memory::InMemoryRemoteStore;
pub use doc_sync_core::{
    AttemptOutcome, Backup, RemoteDocument, RemoteStore, RetryPolicy, StoreError, UpdateAttempt,
    WriteAck, WriteRequest,
};
pub use updater::{CancelToken, SafeUpdater, UpdateError, UpdateReport, UpdateRequest};
