//! Run the host application with the background updater beside it.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::update::schedule::spawn_update_task;
use crate::update::UpdateConfig;

/// How often the placeholder workload reports that it is alive.
const HEARTBEAT: Duration = Duration::from_secs(5);

/// Run until Ctrl+C, checking for updates every `interval_override` seconds
/// (or the configured interval).
pub fn run(config: &AppConfig, interval_override: Option<u64>) -> Result<()> {
    let interval = match interval_override {
        Some(0) => anyhow::bail!("--interval must be greater than zero"),
        Some(secs) => Duration::from_secs(secs),
        None => config.update_interval(),
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run_async(config, interval))
}

async fn run_async(config: &AppConfig, interval: Duration) -> Result<()> {
    let version = env!("OTA_VERSION");
    info!("Starting ota {}", version);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            ctrl_c_cancel.cancel();
        }
    });

    let updater = if config.update_enabled {
        let update_config = UpdateConfig::for_current_process(version, config.source.clone())?;
        info!("Checking for updates every {}s", interval.as_secs());
        Some(spawn_update_task(update_config, interval, cancel.clone()))
    } else {
        info!("Automatic updates are disabled");
        None
    };

    run_workload(&cancel).await;

    if let Some(handle) = updater {
        if let Err(e) = handle.await {
            warn!("Update task ended abnormally: {}", e);
        }
    }
    info!("Stopped");
    Ok(())
}

/// Stand-in for the real application: log a heartbeat until cancelled.
async fn run_workload(cancel: &CancellationToken) {
    loop {
        info!("Application is running...");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(HEARTBEAT) => {}
        }
    }
}
