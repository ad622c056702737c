//! Serve command implementation.

use std::path::Path;

use anyhow::{Context, Result};

use crate::server::{serve, ReleaseStore};

/// Run the update server until Ctrl+C.
pub fn run(port: u16, releases_dir: &Path) -> Result<()> {
    let store = ReleaseStore::new(releases_dir);
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime
        .block_on(serve(store, port))
        .with_context(|| format!("Update server on port {} failed", port))
}
