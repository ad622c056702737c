//! Update command implementation.

use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::update::asset::ResolvedArtifact;
use crate::update::engine::{check_and_update, find_update, UpdateOutcome};
use crate::update::schedule::log_update_error;
use crate::update::source::source_for;
use crate::update::UpdateConfig;

/// Run the update command.
pub fn run(config: &AppConfig, check_only: bool) -> Result<()> {
    let current_version = env!("OTA_VERSION");
    println!("Current version: {}", current_version);
    println!();

    let update_config = one_shot_config(current_version, config)?;

    println!("Checking for updates...");
    if check_only {
        let source = source_for(&update_config.source, current_version, &update_config.target)?;
        match find_update(&update_config, source.as_ref()).inspect_err(log_update_error)? {
            Some(artifact) => display_update_info(&artifact),
            None => print_up_to_date(current_version),
        }
        return Ok(());
    }

    let outcome = check_and_update(&update_config, &CancellationToken::new()).inspect_err(log_update_error)?;
    print_outcome(&outcome, current_version);
    if outcome.needs_restart() {
        println!("Restart ota to run the new version.");
    }
    Ok(())
}

/// Engine input for a single install from the command line.
///
/// A one-shot install never starts a second copy of itself, even when the
/// platform defers the swap to a script.
fn one_shot_config(current_version: &str, config: &AppConfig) -> Result<UpdateConfig> {
    let mut update_config = UpdateConfig::for_current_process(current_version, config.source.clone())?;
    update_config.relaunch = false;
    Ok(update_config)
}

fn print_up_to_date(current_version: &str) {
    println!(
        "{} You are already running the latest version ({}).",
        "Up to date!".green().bold(),
        current_version
    );
}

fn print_outcome(outcome: &UpdateOutcome, current_version: &str) {
    match outcome {
        UpdateOutcome::UpToDate => print_up_to_date(current_version),
        UpdateOutcome::Applied { version, verified } => {
            if !verified {
                println!(
                    "{}: Release has no checksum; the download was not verified.",
                    "Warning".yellow()
                );
            }
            println!("\n{} Updated to {}", "Success!".green().bold(), version);
        }
        UpdateOutcome::Deferred { version, script } => {
            println!(
                "\n{} Update to {} will be installed after this process exits.",
                "Note".yellow(),
                version
            );
            println!("Installer script: {}", script.display().to_string().dimmed());
        }
    }
}

fn display_update_info(artifact: &ResolvedArtifact) {
    println!();
    println!("{}", "Update Available".bold());
    println!("{}", "----------------".dimmed());
    println!("Version:  {}", artifact.version);
    println!("Download: {}", artifact.download_url.dimmed());

    if artifact.expected_checksum.is_some() {
        println!("Checksum: {}", "SHA256 available".dimmed());
    } else {
        println!("Checksum: {}", "Not available".yellow());
    }
    println!();
    println!("Run 'ota update' to install.");
}
