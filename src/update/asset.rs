//! Choose the artifact to download for this platform.

use super::platform::Target;
use super::source::{AssetDescriptor, ReleaseDescriptor};
use super::{UpdateError, UpdateResult};

/// The single artifact an update attempt will download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub version: String,
    pub download_url: String,
    pub expected_checksum: Option<String>,
}

/// Find the first asset whose name contains `<platform>-<arch>`.
///
/// Source order breaks ties. No fallback to a looser key.
pub fn find_asset<'a>(assets: &'a [AssetDescriptor], target: &Target) -> Option<&'a AssetDescriptor> {
    let key = target.asset_key();
    assets.iter().find(|a| a.name.contains(&key))
}

/// Resolve a release to a downloadable artifact for `target`.
pub fn resolve_asset(descriptor: &ReleaseDescriptor, target: &Target) -> UpdateResult<ResolvedArtifact> {
    match descriptor {
        ReleaseDescriptor::Hosted(release) => {
            let asset = find_asset(&release.assets, target).ok_or_else(|| UpdateError::NoAssetFound {
                platform: target.platform.clone(),
                arch: target.arch.clone(),
            })?;
            Ok(ResolvedArtifact {
                version: release.tag.clone(),
                download_url: asset.download_url.clone(),
                expected_checksum: asset.sha256.clone(),
            })
        }
        ReleaseDescriptor::Server(release) => Ok(ResolvedArtifact {
            version: release.version.clone(),
            download_url: release.download_url.clone(),
            expected_checksum: release.checksum_hex.clone(),
        }),
    }
}
