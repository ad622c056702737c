//! Self-update engine: release discovery, download, verification, and
//! in-place replacement of the running executable.

pub mod asset;
pub mod download;
pub mod engine;
pub mod github;
pub mod platform;
pub mod remote;
pub mod restart;
pub mod schedule;
pub mod source;
pub mod swap;
pub mod version;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use platform::Target;
use swap::SwapStrategy;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Get GitHub token from environment if available.
///
/// Checks `GH_TOKEN` first (used by gh CLI), then `GITHUB_TOKEN`.
pub(crate) fn get_github_token_from_env() -> Option<String> {
    std::env::var("GH_TOKEN")
        .or_else(|_| std::env::var("GITHUB_TOKEN"))
        .ok()
        .filter(|token| !token.is_empty())
}

/// Where releases are discovered.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum SourceConfig {
    /// A GitHub-style hosted release list.
    #[serde(rename = "hosted")]
    HostedRepo {
        /// Repository in `owner/name` form.
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default)]
        include_prerelease: bool,
        #[serde(default = "default_api_url")]
        api_url: String,
    },
    /// A dedicated update server speaking the `check/` + `download/` protocol.
    #[serde(rename = "server")]
    CustomServer { base_url: String },
}

fn default_api_url() -> String {
    DEFAULT_GITHUB_API_URL.to_string()
}

impl SourceConfig {
    /// Token sent with discovery and download requests, if any.
    pub fn auth_token(&self) -> Option<&str> {
        match self {
            SourceConfig::HostedRepo { token, .. } => token.as_deref(),
            SourceConfig::CustomServer { .. } => None,
        }
    }
}

/// Everything one update attempt needs, captured up front by the host.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub current_version: String,
    pub executable_path: PathBuf,
    pub source: SourceConfig,
    /// Arguments (without the program name) to relaunch with.
    pub process_args: Vec<String>,
    /// Whether a deferred install starts the new binary once it is in place.
    pub relaunch: bool,
    pub target: Target,
    pub strategy: SwapStrategy,
}

impl UpdateConfig {
    /// Build a config for the running process: its own executable path,
    /// arguments, platform, and replacement strategy.
    pub fn for_current_process(current_version: &str, source: SourceConfig) -> UpdateResult<Self> {
        let executable_path = std::env::current_exe()?;
        Ok(Self {
            current_version: current_version.to_string(),
            executable_path,
            source,
            process_args: std::env::args().skip(1).collect(),
            relaunch: true,
            target: Target::current(),
            strategy: SwapStrategy::for_current_platform(),
        })
    }

    /// `<executable>.bak`
    pub fn backup_path(&self) -> PathBuf {
        swap::backup_path_for(&self.executable_path)
    }
}

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Invalid repository '{0}', expected 'owner/name'")]
    InvalidRepo(String),

    #[error("Failed to fetch release information{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Fetch { status: Option<u16>, message: String },

    #[error("No release asset found for {platform}-{arch}")]
    NoAssetFound { platform: String, arch: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Failed to back up {}: {source}", path.display())]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to replace {} (previous binary kept): {reason}", path.display())]
    ReplaceFailed { path: PathBuf, reason: String },

    #[error(
        "Rollback failed: {} may be missing or corrupt, restore it manually from {} ({source}; replace error: {replace_error})",
        executable.display(),
        backup.display()
    )]
    RollbackFailed {
        executable: PathBuf,
        backup: PathBuf,
        replace_error: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Update cancelled before installation")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Log level the check cycle reports this error at.
    pub fn severity(&self) -> log::Level {
        match self {
            UpdateError::RollbackFailed { .. } | UpdateError::ChecksumMismatch { .. } => {
                log::Level::Error
            }
            UpdateError::Cancelled => log::Level::Info,
            _ => log::Level::Warn,
        }
    }

    /// Whether the live executable may no longer be in a runnable state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UpdateError::RollbackFailed { .. })
    }
}

pub type UpdateResult<T> = Result<T, UpdateError>;
