//! Relaunch the (now updated) executable and exit.

use std::path::Path;
use std::process::{Command, Stdio};

use log::{error, info};

use super::UpdateResult;

/// Trait for restarting the process, allowing for mocking in tests.
pub trait Restarter {
    /// Start `executable` with `args`. On success the real implementation
    /// exits the current process and never returns.
    fn restart(&self, executable: &Path, args: &[String]) -> UpdateResult<()>;

    /// Exit so that a deferred replacement script can take over.
    fn exit(&self);
}

/// Spawns the new binary with inherited stdio, then exits with status 0.
pub struct ProcessRestarter;

impl Restarter for ProcessRestarter {
    fn restart(&self, executable: &Path, args: &[String]) -> UpdateResult<()> {
        spawn(executable, args)?;
        info!("Started {}, exiting", executable.display());
        self.exit();
        unreachable!()
    }

    fn exit(&self) {
        log::logger().flush();
        std::process::exit(0);
    }
}

fn spawn(executable: &Path, args: &[String]) -> UpdateResult<()> {
    Command::new(executable)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| {
            error!("Failed to restart {}: {}", executable.display(), e);
            e
        })?;
    Ok(())
}
