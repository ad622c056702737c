//! Client for the dedicated update server (`ota serve`).

use log::debug;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::platform::Target;
use super::source::{
    discovery_client, status_error, transport_error, ReleaseDescriptor, ReleaseSource,
    ServerRelease,
};
use super::{UpdateError, UpdateResult};

/// Release metadata as stored and served by the update server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub release_date: String,
    pub download_url: String,
    pub checksum: String,
}

pub struct UpdateServerSource {
    client: reqwest::blocking::Client,
    base_url: Url,
    check_url: Url,
}

impl UpdateServerSource {
    pub fn new(base_url: &str, current_version: &str, target: Target) -> UpdateResult<Self> {
        let base_url = parse_base_url(base_url)?;
        let check_url = base_url
            .join(&format!(
                "check/{}/{}/{}",
                target.platform, target.arch, current_version
            ))
            .map_err(|e| UpdateError::Fetch {
                status: None,
                message: format!("Invalid check URL: {}", e),
            })?;

        Ok(Self {
            client: discovery_client()?,
            base_url,
            check_url,
        })
    }

    fn descriptor(&self, info: VersionInfo) -> UpdateResult<ReleaseDescriptor> {
        let download_url = resolve_download_url(&self.base_url, &info.download_url)?;
        Ok(ReleaseDescriptor::Server(ServerRelease {
            version: info.version,
            download_url,
            checksum_hex: Some(info.checksum).filter(|c| !c.trim().is_empty()),
        }))
    }
}

impl ReleaseSource for UpdateServerSource {
    fn fetch_latest_release(&self) -> UpdateResult<Option<ReleaseDescriptor>> {
        debug!("GET {}", self.check_url);
        let response = self
            .client
            .get(self.check_url.clone())
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        debug!("  response: {}", status);
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(response));
        }

        let info: VersionInfo = response.json().map_err(|e| UpdateError::Fetch {
            status: Some(status.as_u16()),
            message: format!("Failed to parse version info: {}", e),
        })?;

        self.descriptor(info).map(Some)
    }
}

/// Parse the server base URL so that relative joins keep its path prefix.
fn parse_base_url(base_url: &str) -> UpdateResult<Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{}/", base_url)
    };
    Url::parse(&normalized).map_err(|e| UpdateError::Fetch {
        status: None,
        message: format!("Invalid update server URL '{}': {}", base_url, e),
    })
}

/// The server publishes `/download/...` paths; absolute URLs pass through.
fn resolve_download_url(base_url: &Url, download_url: &str) -> UpdateResult<String> {
    let relative = download_url.trim_start_matches('/');
    let resolved = match Url::parse(download_url) {
        Ok(absolute) => absolute,
        Err(_) => base_url.join(relative).map_err(|e| UpdateError::Fetch {
            status: None,
            message: format!("Invalid download URL '{}': {}", download_url, e),
        })?,
    };
    Ok(resolved.to_string())
}
