//! Download the release artifact to a private temp file, hashing as it streams.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use sha2::{Digest, Sha256};
use tempfile::TempPath;

use super::source::user_agent;
use super::{UpdateError, UpdateResult};

const DOWNLOAD_TIMEOUT_SECS: u64 = 60;
const CHUNK_SIZE: usize = 8192;

/// Trait for fetching artifact bytes, allowing for mocking in tests.
pub trait ArtifactFetcher {
    /// Open the artifact at `url` as a byte stream.
    fn open(&self, url: &str, token: Option<&str>) -> UpdateResult<Box<dyn Read>>;
}

/// Real fetcher backed by a blocking HTTP client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> UpdateResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

impl ArtifactFetcher for HttpFetcher {
    fn open(&self, url: &str, token: Option<&str>) -> UpdateResult<Box<dyn Read>> {
        debug!("GET {}", url);
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/octet-stream");
        if let Some(token) = token {
            request = request.header("Authorization", format!("token {}", token));
        }

        let response = request
            .send()
            .map_err(|e| UpdateError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Download(format!(
                "HTTP {}: {}",
                status,
                response.text().unwrap_or_default()
            )));
        }

        debug!(
            "  response: {} ({} bytes)",
            status,
            response
                .content_length()
                .map(|len| len.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
        Ok(Box::new(response))
    }
}

/// A fully downloaded, executable artifact waiting to be installed.
///
/// The temp file is deleted when this value is dropped, unless it is renamed
/// into place first.
#[derive(Debug)]
pub struct DownloadResult {
    pub temp_path: TempPath,
    /// Whether a published checksum was checked and matched.
    pub verified: bool,
    /// Hex SHA-256 of the downloaded bytes.
    pub sha256: String,
}

/// Fetch `url` and stage it in `dir`.
pub fn download(
    fetcher: &dyn ArtifactFetcher,
    url: &str,
    token: Option<&str>,
    expected_checksum: Option<&str>,
    dir: &Path,
) -> UpdateResult<DownloadResult> {
    let reader = fetcher.open(url, token)?;
    stage_artifact(reader, dir, expected_checksum)
}

/// Stream `reader` into a fresh temp file in `dir`, hashing as it goes, then
/// verify against `expected_checksum` when one is given.
pub fn stage_artifact(
    mut reader: impl Read,
    dir: &Path,
    expected_checksum: Option<&str>,
) -> UpdateResult<DownloadResult> {
    let mut file = tempfile::Builder::new()
        .prefix(".ota-update-")
        .suffix(".bin")
        .tempfile_in(dir)?;

    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let mut buffer = [0u8; CHUNK_SIZE];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| UpdateError::Download(format!("read failed after {} bytes: {}", written, e)))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        file.write_all(&buffer[..bytes_read])?;
        written += bytes_read as u64;
    }
    file.as_file_mut().flush()?;
    file.as_file().sync_all()?;

    let temp_path = file.into_temp_path();
    set_executable(&temp_path)?;

    let actual = format!("{:x}", hasher.finalize());
    debug!("downloaded {} bytes to {} (sha256 {})", written, temp_path.display(), actual);

    let verified = match expected_checksum {
        Some(expected) => {
            verify_checksum(&actual, expected)?;
            true
        }
        None => {
            warn!("No checksum published for this artifact, installing unverified download");
            false
        }
    };

    Ok(DownloadResult {
        temp_path,
        verified,
        sha256: actual,
    })
}

/// Compare hex digests, ignoring case and surrounding whitespace.
pub fn verify_checksum(actual: &str, expected: &str) -> UpdateResult<()> {
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(UpdateError::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Compute SHA256 hash of a file on disk.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Set executable bit on Unix.
pub(crate) fn set_executable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Arc;

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;

    use crate::update::source::test_server::{self, SeenHeaders};

    // SHA256 of "hello world"
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_verify_checksum_success_ignores_case() {
        assert!(verify_checksum(HELLO_SHA256, HELLO_SHA256).is_ok());
        assert!(verify_checksum(HELLO_SHA256, &HELLO_SHA256.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_checksum_failure() {
        let wrong = "0000000000000000000000000000000000000000000000000000000000000000";
        match verify_checksum(HELLO_SHA256, wrong) {
            Err(UpdateError::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, wrong);
                assert_eq!(actual, HELLO_SHA256);
            }
            other => panic!("Expected ChecksumMismatch error, got {:?}", other),
        }
    }

    #[test]
    fn test_stage_with_matching_checksum() {
        let dir = TempDir::new().unwrap();
        let staged = stage_artifact(Cursor::new(b"hello world".to_vec()), dir.path(), Some(HELLO_SHA256)).unwrap();

        assert!(staged.verified);
        assert_eq!(staged.sha256, HELLO_SHA256);
        assert_eq!(std::fs::read(&staged.temp_path).unwrap(), b"hello world");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&staged.temp_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }

        let path = staged.temp_path.to_path_buf();
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn test_stage_with_flipped_checksum_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut flipped = HELLO_SHA256.to_string();
        flipped.replace_range(0..1, "c");

        let result = stage_artifact(Cursor::new(b"hello world".to_vec()), dir.path(), Some(&flipped));
        assert!(matches!(result, Err(UpdateError::ChecksumMismatch { .. })));
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_stage_without_checksum_is_unverified() {
        let dir = TempDir::new().unwrap();
        let staged = stage_artifact(Cursor::new(b"hello world".to_vec()), dir.path(), None).unwrap();
        assert!(!staged.verified);
        assert_eq!(staged.sha256, HELLO_SHA256);
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    #[test]
    fn test_stage_transport_failure_is_download_error() {
        let dir = TempDir::new().unwrap();
        let result = stage_artifact(FailingReader, dir.path(), None);
        assert!(matches!(result, Err(UpdateError::Download(_))));
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_file_sha256() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(file_sha256(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_http_fetcher_streams_body() {
        let seen: SeenHeaders = Arc::default();
        let recorder = seen.clone();
        let router = Router::new().route(
            "/download/app",
            get(move |headers: HeaderMap| {
                let recorder = recorder.clone();
                async move {
                    *recorder.lock().unwrap() = Some(headers);
                    "hello world"
                }
            }),
        );
        let base = test_server::spawn(router);

        let dir = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new().unwrap();
        let staged = download(
            &fetcher,
            &format!("{}/download/app", base),
            Some("s3cret"),
            Some(HELLO_SHA256),
            dir.path(),
        )
        .unwrap();

        assert!(staged.verified);
        assert_eq!(std::fs::read(&staged.temp_path).unwrap(), b"hello world");
        assert_eq!(
            test_server::header(&seen, "accept").as_deref(),
            Some("application/octet-stream")
        );
        assert_eq!(
            test_server::header(&seen, "authorization").as_deref(),
            Some("token s3cret")
        );
    }

    #[test]
    fn test_http_fetcher_rejects_error_status() {
        let router = Router::new().route(
            "/download/app",
            get(|| async { (StatusCode::NOT_FOUND, "Binary not found") }),
        );
        let base = test_server::spawn(router);

        let fetcher = HttpFetcher::new().unwrap();
        match fetcher.open(&format!("{}/download/app", base), None) {
            Err(UpdateError::Download(message)) => {
                assert!(message.contains("404"));
                assert!(message.contains("Binary not found"));
            }
            Err(other) => panic!("Expected Download error, got {:?}", other),
            Ok(_) => panic!("Expected Download error, got a body"),
        }
    }
}
