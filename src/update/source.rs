//! Release discovery: the [`ReleaseSource`] seam and the normalized
//! descriptor both source variants produce.

use std::time::Duration;

use super::github::HostedRepoSource;
use super::remote::UpdateServerSource;
use super::{SourceConfig, UpdateError, UpdateResult};

pub(crate) const DISCOVERY_TIMEOUT_SECS: u64 = 30;

/// `User-Agent` sent with every request the engine makes.
pub(crate) fn user_agent() -> String {
    format!("ota-updater/{}", env!("OTA_VERSION"))
}

/// A downloadable artifact attached to a hosted release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub name: String,
    pub download_url: String,
    /// Hex SHA-256 published with the asset, when the host provides one.
    pub sha256: Option<String>,
}

/// A hosted-repo release: tag plus per-platform assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedRelease {
    pub tag: String,
    pub is_prerelease: bool,
    pub assets: Vec<AssetDescriptor>,
}

/// An update-server answer: already resolved to one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRelease {
    pub version: String,
    pub download_url: String,
    pub checksum_hex: Option<String>,
}

/// Normalized description of the newest candidate release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseDescriptor {
    Hosted(HostedRelease),
    Server(ServerRelease),
}

impl ReleaseDescriptor {
    /// Version string as published (tag for hosted releases).
    pub fn version(&self) -> &str {
        match self {
            ReleaseDescriptor::Hosted(release) => &release.tag,
            ReleaseDescriptor::Server(release) => &release.version,
        }
    }

    pub fn is_prerelease(&self) -> bool {
        matches!(self, ReleaseDescriptor::Hosted(release) if release.is_prerelease)
    }
}

/// Trait for release discovery, allowing for mocking in tests.
pub trait ReleaseSource {
    /// Fetch the newest release. `Ok(None)` means nothing to offer.
    fn fetch_latest_release(&self) -> UpdateResult<Option<ReleaseDescriptor>>;
}

/// Build the real source for a configuration.
pub fn source_for(
    config: &SourceConfig,
    current_version: &str,
    target: &super::platform::Target,
) -> UpdateResult<Box<dyn ReleaseSource>> {
    match config {
        SourceConfig::HostedRepo {
            repo,
            token,
            include_prerelease,
            api_url,
        } => Ok(Box::new(HostedRepoSource::new(
            api_url,
            repo,
            token.clone(),
            *include_prerelease,
        )?)),
        SourceConfig::CustomServer { base_url } => Ok(Box::new(UpdateServerSource::new(
            base_url,
            current_version,
            target.clone(),
        )?)),
    }
}

pub(crate) fn discovery_client() -> UpdateResult<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .user_agent(user_agent())
        .timeout(Duration::from_secs(DISCOVERY_TIMEOUT_SECS))
        .build()?)
}

/// Map a transport failure to a fetch error.
pub(crate) fn transport_error(e: reqwest::Error) -> UpdateError {
    UpdateError::Fetch {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

/// Turn a non-2xx response into a fetch error, keeping the status for logs.
pub(crate) fn status_error(response: reqwest::blocking::Response) -> UpdateError {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    UpdateError::Fetch {
        status: Some(status.as_u16()),
        message: truncate(&body, 200),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
