//! GitHub-style release API client for hosted repositories.

use log::debug;
use serde::Deserialize;

use super::source::{
    discovery_client, status_error, transport_error, AssetDescriptor, HostedRelease,
    ReleaseDescriptor, ReleaseSource,
};
use super::{UpdateError, UpdateResult};

const ACCEPT: &str = "application/vnd.github+json";
const LIST_PAGE_SIZE: u32 = 10;

/// GitHub release metadata.
#[derive(Deserialize, Debug, Clone)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Release asset metadata.
#[derive(Deserialize, Debug, Clone)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    /// Digest in format "sha256:abc123..."
    #[serde(default)]
    pub digest: Option<String>,
}

impl Asset {
    /// Extract SHA256 hash from digest field.
    pub fn sha256(&self) -> Option<&str> {
        self.digest
            .as_ref()
            .and_then(|d| d.strip_prefix("sha256:"))
    }
}

impl From<Release> for HostedRelease {
    fn from(release: Release) -> Self {
        HostedRelease {
            tag: release.tag_name,
            is_prerelease: release.prerelease,
            assets: release
                .assets
                .into_iter()
                .map(|asset| AssetDescriptor {
                    sha256: asset.sha256().map(str::to_string),
                    name: asset.name,
                    download_url: asset.browser_download_url,
                })
                .collect(),
        }
    }
}

/// Split `owner/name`.
pub fn parse_repo(repo: &str) -> UpdateResult<(&str, &str)> {
    match repo.split('/').collect::<Vec<_>>().as_slice() {
        [owner, name] if !owner.is_empty() && !name.is_empty() => Ok((*owner, *name)),
        _ => Err(UpdateError::InvalidRepo(repo.to_string())),
    }
}

/// Pick the newest usable release from a list response (newest first).
///
/// Drafts are never offered. Prereleases only when `include_prerelease`.
pub fn select_newest(releases: Vec<Release>, include_prerelease: bool) -> Option<Release> {
    releases
        .into_iter()
        .find(|r| !r.draft && (include_prerelease || !r.prerelease))
}

/// Real client for the hosted release API.
pub struct HostedRepoSource {
    client: reqwest::blocking::Client,
    releases_url: String,
    token: Option<String>,
    include_prerelease: bool,
}

impl HostedRepoSource {
    pub fn new(
        api_url: &str,
        repo: &str,
        token: Option<String>,
        include_prerelease: bool,
    ) -> UpdateResult<Self> {
        let (owner, name) = parse_repo(repo)?;
        Ok(Self {
            client: discovery_client()?,
            releases_url: format!(
                "{}/repos/{}/{}/releases",
                api_url.trim_end_matches('/'),
                owner,
                name
            ),
            token,
            include_prerelease,
        })
    }

    /// Stable-only lookups use the `latest` endpoint; prerelease-aware lookups
    /// need the list.
    fn endpoint(&self) -> String {
        if self.include_prerelease {
            format!("{}?per_page={}", self.releases_url, LIST_PAGE_SIZE)
        } else {
            format!("{}/latest", self.releases_url)
        }
    }

    fn get(&self, url: &str) -> UpdateResult<reqwest::blocking::Response> {
        debug!("GET {}", url);
        let mut request = self.client.get(url).header("Accept", ACCEPT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = request.send().map_err(transport_error)?;
        debug!("  response: {}", response.status());
        if !response.status().is_success() {
            return Err(status_error(response));
        }
        Ok(response)
    }
}

impl ReleaseSource for HostedRepoSource {
    fn fetch_latest_release(&self) -> UpdateResult<Option<ReleaseDescriptor>> {
        let response = self.get(&self.endpoint())?;

        let release = if self.include_prerelease {
            let releases: Vec<Release> = response.json().map_err(|e| UpdateError::Fetch {
                status: None,
                message: format!("Failed to parse release list: {}", e),
            })?;
            select_newest(releases, true)
        } else {
            let release: Release = response.json().map_err(|e| UpdateError::Fetch {
                status: None,
                message: format!("Failed to parse release: {}", e),
            })?;
            Some(release)
        };

        Ok(release.map(|r| ReleaseDescriptor::Hosted(r.into())))
    }
}
