//! On-disk release store: `<root>/<platform>/<arch>/<version>.{bin,json}`.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::update::download::set_executable;
use crate::update::remote::VersionInfo;
use crate::update::version::is_newer;

#[derive(Debug, Clone)]
pub struct ReleaseStore {
    root: PathBuf,
}

impl ReleaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the releases directory if it does not exist yet.
    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, platform: &str, arch: &str) -> PathBuf {
        self.root.join(platform).join(arch)
    }

    pub fn binary_path(&self, platform: &str, arch: &str, version: &str) -> PathBuf {
        self.target_dir(platform, arch).join(format!("{}.bin", version))
    }

    /// Newest release for a target, or `None` if nothing was uploaded.
    ///
    /// The version is taken from the metadata file name. Files that cannot
    /// be read or parsed are skipped.
    pub fn latest(&self, platform: &str, arch: &str) -> io::Result<Option<VersionInfo>> {
        let dir = self.target_dir(platform, arch);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut latest: Option<(String, VersionInfo)> = None;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() || path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(version) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let info = match read_metadata(&path) {
                Ok(info) => info,
                Err(e) => {
                    warn!("Skipping release metadata {}: {}", path.display(), e);
                    continue;
                }
            };

            let newer = match &latest {
                None => true,
                Some((current, _)) => is_newer(version, current),
            };
            if newer {
                latest = Some((version.to_string(), info));
            }
        }

        Ok(latest.map(|(_, info)| info))
    }

    /// The newest release for a target if it is newer than `current_version`.
    pub fn check(&self, platform: &str, arch: &str, current_version: &str) -> io::Result<Option<VersionInfo>> {
        let latest = self.latest(platform, arch)?;
        Ok(latest.filter(|info| is_newer(&info.version, current_version)))
    }

    /// Store a binary and its metadata, returning the metadata written.
    pub fn save(&self, platform: &str, arch: &str, version: &str, binary: &[u8]) -> io::Result<VersionInfo> {
        let dir = self.target_dir(platform, arch);
        fs::create_dir_all(&dir)?;

        let bin_path = self.binary_path(platform, arch, version);
        let mut file = fs::File::create(&bin_path)?;
        file.write_all(binary)?;
        file.sync_all()?;
        drop(file);
        set_executable(&bin_path)?;

        let info = VersionInfo {
            version: version.to_string(),
            release_date: chrono::Local::now().to_rfc3339(),
            download_url: format!("/download/{}/{}/{}", platform, arch, version),
            checksum: format!("{:x}", Sha256::digest(binary)),
        };

        let meta_path = dir.join(format!("{}.json", version));
        fs::write(&meta_path, serde_json::to_vec(&info)?)?;
        debug!("Stored {} ({} bytes)", bin_path.display(), binary.len());

        Ok(info)
    }
}

fn read_metadata(path: &Path) -> io::Result<VersionInfo> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_latest_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = ReleaseStore::new(dir.path());
        assert_eq!(store.latest("linux", "amd64").unwrap(), None);
    }

    #[test]
    fn test_save_writes_binary_and_metadata() {
        let dir = TempDir::new().unwrap();
        let store = ReleaseStore::new(dir.path());

        let info = store.save("linux", "amd64", "1.2.0", b"hello world").unwrap();
        assert_eq!(info.version, "1.2.0");
        assert_eq!(info.download_url, "/download/linux/amd64/1.2.0");
        assert_eq!(
            info.checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert!(chrono::DateTime::parse_from_rfc3339(&info.release_date).is_ok());

        let bin = store.binary_path("linux", "amd64", "1.2.0");
        assert_eq!(fs::read(&bin).unwrap(), b"hello world");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&bin).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        let meta = read_metadata(&dir.path().join("linux/amd64/1.2.0.json")).unwrap();
        assert_eq!(meta, info);
    }

    #[test]
    fn test_latest_picks_newest_and_skips_garbage() {
        let dir = TempDir::new().unwrap();
        let store = ReleaseStore::new(dir.path());
        store.save("linux", "amd64", "1.1.0", b"a").unwrap();
        store.save("linux", "amd64", "1.3.0", b"c").unwrap();
        store.save("linux", "amd64", "1.2.0", b"b").unwrap();
        fs::write(dir.path().join("linux/amd64/1.9.0.json"), "not json").unwrap();
        fs::write(dir.path().join("linux/amd64/notes.txt"), "ignored").unwrap();

        let latest = store.latest("linux", "amd64").unwrap().unwrap();
        assert_eq!(latest.version, "1.3.0");

        // Other targets are separate.
        assert_eq!(store.latest("darwin", "arm64").unwrap(), None);
    }

    #[test]
    fn test_check_only_returns_newer() {
        let dir = TempDir::new().unwrap();
        let store = ReleaseStore::new(dir.path());
        store.save("linux", "amd64", "1.2.0", b"b").unwrap();

        assert!(store.check("linux", "amd64", "1.1.0").unwrap().is_some());
        assert!(store.check("linux", "amd64", "1.2.0").unwrap().is_none());
        assert!(store.check("linux", "amd64", "v1.2.0").unwrap().is_none());
        assert!(store.check("linux", "amd64", "1.3.0").unwrap().is_none());
    }
}
