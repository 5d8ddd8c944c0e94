//! Configuration parsing and validation.
//!
//! doc-sync is configured via a TOML file (default `config/dsync.toml`):
//!
//! ```toml
//! [remote]
//! base_url = "https://confluence.example.com"
//! token_env = "CONFLUENCE_TOKEN"
//!
//! [lock]
//! dir = ".locks"
//! timeout_secs = 60
//!
//! [backup]
//! dir = ".backups"
//!
//! [retry]
//! max_retries = 3
//! backoff_base_ms = 1000
//! backoff_cap_ms = 60000
//! ```
//!
//! Only `[remote].base_url` is required; every other key has a default.
//! See `config/dsync.example.toml` for the full set of options.

use anyhow::{bail, Context, Result};
use doc_sync_core::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Inline token. Prefer `token_env` so secrets stay out of the file.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Skip TLS certificate verification (self-signed corporate servers).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_token_env() -> String {
    "CONFLUENCE_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    #[serde(default = "default_lock_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_lock_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            dir: default_lock_dir(),
            timeout_secs: default_lock_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from(".locks")
}
fn default_lock_timeout_secs() -> u64 {
    60
}
fn default_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(".backups")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_cap_ms() -> u64 {
    60_000
}
fn default_jitter() -> f64 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            dir: default_audit_dir(),
        }
    }
}

fn default_audit_enabled() -> bool {
    true
}
fn default_audit_dir() -> PathBuf {
    PathBuf::from(".audit_log")
}

impl Config {
    /// Resolve the API token: inline value first, then `token_env`.
    pub fn auth_token(&self) -> Result<String> {
        if let Some(token) = self.remote.auth_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
        match std::env::var(&self.remote.token_env) {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => bail!(
                "No API token: set remote.auth_token or the {} environment variable",
                self.remote.token_env
            ),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.timeout_secs)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.backoff_base_ms),
            Duration::from_millis(self.retry.backoff_cap_ms),
        )
        .with_jitter(self.retry.jitter)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate remote
    let base_url = config.remote.base_url.trim();
    if base_url.is_empty() {
        bail!("remote.base_url must not be empty");
    }
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        bail!(
            "remote.base_url must start with http:// or https://, got '{}'",
            base_url
        );
    }
    if config.remote.timeout_secs == 0 {
        bail!("remote.timeout_secs must be > 0");
    }

    // Validate lock
    if config.lock.poll_interval_ms == 0 {
        bail!("lock.poll_interval_ms must be > 0");
    }

    // Validate retry
    if config.retry.backoff_base_ms == 0 {
        bail!("retry.backoff_base_ms must be > 0");
    }
    if config.retry.backoff_cap_ms < config.retry.backoff_base_ms {
        bail!("retry.backoff_cap_ms must be >= retry.backoff_base_ms");
    }
    if !(0.0..=1.0).contains(&config.retry.jitter) {
        bail!("retry.jitter must be in [0.0, 1.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(
            r#"
[remote]
base_url = "https://confluence.example.com"
"#,
        )
        .unwrap();

        assert_eq!(config.remote.token_env, "CONFLUENCE_TOKEN");
        assert_eq!(config.lock.dir, PathBuf::from(".locks"));
        assert_eq!(config.lock_timeout(), Duration::from_secs(60));
        assert_eq!(config.backup.dir, PathBuf::from(".backups"));
        assert!(config.audit.enabled);

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base, Duration::from_secs(1));
        assert_eq!(policy.cap, Duration::from_secs(60));
    }

    #[test]
    fn full_config_parses() {
        let config = parse_config(
            r#"
[remote]
base_url = "http://localhost:8090"
auth_token = "secret"
timeout_secs = 5
accept_invalid_certs = true

[lock]
dir = "/tmp/locks"
timeout_secs = 0
poll_interval_ms = 50

[backup]
dir = "/tmp/backups"

[retry]
max_retries = 5
backoff_base_ms = 200
backoff_cap_ms = 2000
jitter = 0.0

[audit]
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(config.auth_token().unwrap(), "secret");
        assert!(config.remote.accept_invalid_certs);
        assert_eq!(config.lock_timeout(), Duration::ZERO);
        assert_eq!(config.lock_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.retry_policy().max_attempts(), 6);
        assert!(!config.audit.enabled);
    }

    #[test]
    fn rejects_bad_base_url() {
        let err = parse_config("[remote]\nbase_url = \"confluence.example.com\"\n").unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn rejects_cap_below_base() {
        let err = parse_config(
            r#"
[remote]
base_url = "https://c.example.com"

[retry]
backoff_base_ms = 1000
backoff_cap_ms = 10
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("backoff_cap_ms"));
    }

    #[test]
    fn rejects_jitter_out_of_range() {
        let err = parse_config(
            r#"
[remote]
base_url = "https://c.example.com"

[retry]
jitter = 1.5
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("jitter"));
    }

    #[test]
    fn token_falls_back_to_env() {
        let config = parse_config(
            r#"
[remote]
base_url = "https://c.example.com"
token_env = "DSYNC_TEST_TOKEN_FALLBACK"
"#,
        )
        .unwrap();

        std::env::remove_var("DSYNC_TEST_TOKEN_FALLBACK");
        assert!(config.auth_token().is_err());

        std::env::set_var("DSYNC_TEST_TOKEN_FALLBACK", "from-env");
        assert_eq!(config.auth_token().unwrap(), "from-env");
        std::env::remove_var("DSYNC_TEST_TOKEN_FALLBACK");
    }
}
