use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ota", version = env!("OTA_VERSION"), about = "Self-updating service with an optional update server")]
pub struct Cli {
    /// Use a specific config file instead of the default
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output for debugging update checks and downloads
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the application with background update checks
    Run {
        /// Seconds between update checks (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Check for an update once and install it
    Update {
        /// Check for updates without installing
        #[arg(long)]
        check: bool,
    },

    /// Serve releases to other instances
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Directory holding uploaded binaries and their metadata
        #[arg(long, default_value = "./releases")]
        releases_dir: PathBuf,
    },
}
