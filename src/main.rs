mod cli;
mod commands;
mod config;
mod platform;
mod server;
mod update;

use anyhow::Result;
use clap::Parser;

use cli::args::{Cli, Commands};
use config::AppConfig;

fn main() -> Result<()> {
    setup_broken_pipe_handling();
    let cli = Cli::parse();

    // The update server does not use the client config.
    if let Commands::Serve { port, releases_dir } = &cli.command {
        init_logging(cli.verbose, None);
        commands::serve::run(*port, releases_dir)?;
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(cli.verbose, Some(&config.log_level));

    match &cli.command {
        Commands::Run { interval } => commands::run::run(&config, *interval)?,
        Commands::Update { check } => commands::update::run(&config, *check)?,
        Commands::Serve { .. } => unreachable!(), // Handled above
    }

    Ok(())
}

/// Initialize logging based on the `--verbose` flag, `OTA_LOG` env var, or
/// the configured level.
///
/// - `OTA_LOG` env var: full filter control (e.g. `OTA_LOG=ota::update=trace`)
/// - `--verbose`: sets the `ota` crate to `Debug` level
/// - Otherwise: the configured `log_level` (default `info`)
fn init_logging(verbose: bool, configured: Option<&str>) {
    let env_var = std::env::var("OTA_LOG").ok();

    let mut builder = env_logger::Builder::new();
    builder.format_target(true);
    builder.format_module_path(false);

    if let Some(ref filter) = env_var {
        builder.parse_filters(filter);
    } else if verbose {
        builder.filter_module("ota", log::LevelFilter::Debug);
        builder.filter_level(log::LevelFilter::Info);
    } else {
        builder.parse_filters(configured.unwrap_or("info"));
    }

    builder.init();
}

/// Handle broken pipe gracefully instead of panicking.
///
/// When output is piped to a process that exits early (e.g., `ota update --check | head -1`),
/// Rust's `println!` panics because the runtime sets SIGPIPE to SIG_IGN. This function:
/// - On Unix: resets SIGPIPE to default behavior so the OS terminates the process cleanly
/// - On all platforms: installs a panic hook that exits silently on stdout pipe failures,
///   as a fallback (and the primary handler on Windows where there's no SIGPIPE)
fn setup_broken_pipe_handling() {
    #[cfg(unix)]
    unsafe {
        // SIGPIPE = 13, SIG_DFL = 0 (POSIX constants, stable across all Unix platforms)
        unsafe extern "C" {
            fn signal(sig: i32, handler: usize) -> usize;
        }
        signal(13, 0);
    }

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str())
            .or_else(|| info.payload().downcast_ref::<&str>().copied())
            .unwrap_or("");

        if msg.contains("failed printing to stdout") {
            std::process::exit(0);
        }

        default_hook(info);
    }));
}
