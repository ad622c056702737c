//! Periodic update checks running beside the host application.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, log};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::download::{ArtifactFetcher, HttpFetcher};
use super::engine::{check_and_update_impl, UpdateOutcome};
use super::restart::{ProcessRestarter, Restarter};
use super::source::{source_for, ReleaseSource};
use super::{UpdateConfig, UpdateError, UpdateResult};

/// Log an update error at the level it warrants.
pub fn log_update_error(e: &UpdateError) {
    log!(e.severity(), "Update error: {}", e);
    if e.is_fatal() {
        error!("Executable may be unusable; no further update is attempted before the next check");
    }
}

/// One full check: update if possible, then restart or exit as the outcome
/// requires. Every error is logged here and returned for inspection.
pub fn check_cycle(
    config: &UpdateConfig,
    source: &dyn ReleaseSource,
    fetcher: &dyn ArtifactFetcher,
    restarter: &dyn Restarter,
    cancel: &CancellationToken,
) -> UpdateResult<UpdateOutcome> {
    info!("Checking for updates...");
    let outcome = check_and_update_impl(config, source, fetcher, cancel).inspect_err(log_update_error)?;

    debug!("Update cycle finished (applied: {})", outcome.is_applied());
    match &outcome {
        UpdateOutcome::UpToDate => info!("No updates available"),
        UpdateOutcome::Applied { version, verified } => {
            if !verified {
                info!("Installed {} without checksum verification", version);
            }
            info!("Application updated to {}. Restarting...", version);
            if let Err(e) = restarter.restart(&config.executable_path, &config.process_args) {
                error!("Restart failed, continuing on the previous binary until next start: {}", e);
            }
        }
        UpdateOutcome::Deferred { version, script } => {
            info!(
                "Update to {} will be installed by {} after exit. Exiting...",
                version,
                script.display()
            );
            restarter.exit();
        }
    }
    Ok(outcome)
}

/// Run one check with the real HTTP clients and process restarter.
pub fn run_cycle(config: &UpdateConfig, cancel: &CancellationToken) -> UpdateResult<UpdateOutcome> {
    let source = source_for(&config.source, &config.current_version, &config.target)
        .inspect_err(log_update_error)?;
    let fetcher = HttpFetcher::new().inspect_err(log_update_error)?;
    check_cycle(config, source.as_ref(), &fetcher, &ProcessRestarter, cancel)
}

/// Run `cycle` now and then every `interval` until `cancel` fires.
///
/// The next wait starts only after the previous cycle has returned, so cycles
/// never overlap. Cancellation is observed between cycles; a running cycle is
/// left to finish.
pub async fn run_update_loop<F>(interval: Duration, cancel: CancellationToken, cycle: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let cycle = Arc::new(cycle);
    while !cancel.is_cancelled() {
        let task = Arc::clone(&cycle);
        if let Err(e) = tokio::task::spawn_blocking(move || (*task)()).await {
            error!("Update check aborted: {}", e);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("Update task stopped");
}

/// Spawn the background update task for `config`.
pub fn spawn_update_task(config: UpdateConfig, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    let cycle_cancel = cancel.clone();
    tokio::spawn(run_update_loop(interval, cancel, move || {
        let _ = run_cycle(&config, &cycle_cancel);
    }))
}
