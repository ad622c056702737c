//! One update attempt, end to end: discover, compare, resolve, download,
//! swap.

use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use super::asset::{resolve_asset, ResolvedArtifact};
use super::download::{download, ArtifactFetcher, HttpFetcher};
use super::source::{source_for, ReleaseSource};
use super::swap::{SwapManager, SwapOutcome};
use super::version::is_newer;
use super::{UpdateConfig, UpdateError, UpdateResult};

/// What an update attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Already running the newest release.
    UpToDate,
    /// New binary is in place and verified on disk. Restart to run it.
    Applied { version: String, verified: bool },
    /// A helper script will install the new binary after this process exits.
    /// Completion is not checked.
    Deferred { version: String, script: PathBuf },
}

impl UpdateOutcome {
    /// Whether an update was (or will be) installed.
    pub fn is_applied(&self) -> bool {
        !matches!(self, UpdateOutcome::UpToDate)
    }

    /// Whether the caller should relaunch the executable itself.
    pub fn needs_restart(&self) -> bool {
        matches!(self, UpdateOutcome::Applied { .. })
    }
}

/// Check for a newer release and install it, using the real HTTP clients.
pub fn check_and_update(config: &UpdateConfig, cancel: &CancellationToken) -> UpdateResult<UpdateOutcome> {
    let source = source_for(&config.source, &config.current_version, &config.target)?;
    let fetcher = HttpFetcher::new()?;
    check_and_update_impl(config, source.as_ref(), &fetcher, cancel)
}

/// Find the artifact to install, or `None` when up to date.
pub fn find_update(config: &UpdateConfig, source: &dyn ReleaseSource) -> UpdateResult<Option<ResolvedArtifact>> {
    let Some(release) = source.fetch_latest_release()? else {
        debug!("No release found");
        return Ok(None);
    };

    if !is_newer(release.version(), &config.current_version) {
        debug!(
            "Latest release {} is not newer than {}",
            release.version(),
            config.current_version
        );
        return Ok(None);
    }

    info!(
        "Update available for {}: {} -> {}",
        config.target,
        config.current_version,
        release.version()
    );
    if release.is_prerelease() {
        info!("{} is a prerelease", release.version());
    }
    resolve_asset(&release, &config.target).map(Some)
}

/// Core update flow, extracted for testability.
pub fn check_and_update_impl(
    config: &UpdateConfig,
    source: &dyn ReleaseSource,
    fetcher: &dyn ArtifactFetcher,
    cancel: &CancellationToken,
) -> UpdateResult<UpdateOutcome> {
    let Some(artifact) = find_update(config, source)? else {
        return Ok(UpdateOutcome::UpToDate);
    };

    let staged = download(
        fetcher,
        &artifact.download_url,
        config.source.auth_token(),
        artifact.expected_checksum.as_deref(),
        staging_dir(&config.executable_path),
    )?;

    // Nothing destructive has happened yet; dropping `staged` removes it.
    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }

    let verified = staged.verified;
    let mut swap = SwapManager::new(&config.executable_path, &config.backup_path(), config.strategy);
    let record = swap.backup()?;

    let relaunch = config.relaunch.then_some(config.process_args.as_slice());
    let swapped = swap.replace(staged, &record, relaunch);
    debug!("Swap ended in state {:?}", swap.state());
    match swapped? {
        SwapOutcome::Confirmed => {
            info!("Installed {} at {}", artifact.version, config.executable_path.display());
            Ok(UpdateOutcome::Applied {
                version: artifact.version,
                verified,
            })
        }
        SwapOutcome::Deferred { script } => Ok(UpdateOutcome::Deferred {
            version: artifact.version,
            script,
        }),
    }
}

/// Stage next to the executable so the final rename stays on one filesystem.
fn staging_dir(executable: &Path) -> &Path {
    executable
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}
