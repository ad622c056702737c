//! Application configuration.
//!
//! Stored as TOML in `<config dir>/ota-updater/config.toml`, with environment
//! variables taking precedence over the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::config_dir;
use crate::update::{get_github_token_from_env, SourceConfig, DEFAULT_GITHUB_API_URL};

const DEFAULT_REPO: &str = "noamstrauss/ota-updater";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot determine config directory")]
    NoConfigDir,

    #[error("Config error: {0}")]
    Invalid(String),

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Run the background update task.
    pub update_enabled: bool,

    /// Seconds between update checks.
    pub update_interval_secs: u64,

    /// Default log filter when neither `OTA_LOG` nor `--verbose` is given.
    pub log_level: String,

    pub source: SourceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            update_enabled: true,
            update_interval_secs: 60,
            log_level: "info".to_string(),
            source: SourceConfig::HostedRepo {
                repo: DEFAULT_REPO.to_string(),
                token: None,
                include_prerelease: false,
                api_url: DEFAULT_GITHUB_API_URL.to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load from `path` (or the default location), writing the defaults out
    /// first if no file exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()?,
        };

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            debug!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save(&path)?;
            config
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        if let SourceConfig::HostedRepo { token, .. } = &mut config.source {
            if let Some(env_token) = get_github_token_from_env() {
                *token = Some(env_token);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Save config to disk with restrictive permissions.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;

        // Write to temp file first for atomic operation
        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &content)?;

        // Set permissions to 0600 (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&temp_path, perms)?;
        }

        // Atomic rename
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Apply `GITHUB_REPO`, `UPDATE_URL`, `LOG_LEVEL`, `UPDATE_ENABLED` and
    /// `UPDATE_INTERVAL` (minutes). Unparsable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(repo) = lookup("GITHUB_REPO") {
            match &mut self.source {
                SourceConfig::HostedRepo { repo: current, .. } => *current = repo,
                SourceConfig::CustomServer { .. } => {
                    self.source = SourceConfig::HostedRepo {
                        repo,
                        token: None,
                        include_prerelease: false,
                        api_url: DEFAULT_GITHUB_API_URL.to_string(),
                    }
                }
            }
        }

        if let Some(base_url) = lookup("UPDATE_URL") {
            self.source = SourceConfig::CustomServer { base_url };
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }

        if let Some(enabled) = lookup("UPDATE_ENABLED").and_then(|v| parse_bool(&v)) {
            self.update_enabled = enabled;
        }

        if let Some(minutes) = lookup("UPDATE_INTERVAL").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.update_interval_secs = minutes.saturating_mul(60);
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.update_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "update_interval_secs must be greater than zero".to_string(),
            ));
        }
        match &self.source {
            SourceConfig::HostedRepo { repo, .. } => {
                crate::update::github::parse_repo(repo)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            }
            SourceConfig::CustomServer { base_url } => {
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                    return Err(ConfigError::Invalid(format!(
                        "update server URL '{}' must start with http:// or https://",
                        base_url
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// `true`/`false` in the spellings people actually put in env vars.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Get the path to the config file.
pub fn config_path() -> ConfigResult<PathBuf> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join("config.toml"))
}
