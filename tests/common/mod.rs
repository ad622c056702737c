#![allow(dead_code)]

use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;

/// Environment variables that would leak the developer's setup into a test.
const ISOLATED_VARS: &[&str] = &[
    "OTA_LOG",
    "GH_TOKEN",
    "GITHUB_TOKEN",
    "GITHUB_REPO",
    "UPDATE_URL",
    "LOG_LEVEL",
    "UPDATE_ENABLED",
    "UPDATE_INTERVAL",
];

/// A self-contained test environment with an isolated config directory.
pub struct TestEnv {
    pub dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        TestEnv {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Create a test environment with the given config file content.
    pub fn with_config(toml: &str) -> Self {
        let env = Self::new();
        let path = env.config_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, toml).unwrap();
        env
    }

    /// Where the default config lives for this environment.
    pub fn config_path(&self) -> PathBuf {
        self.dir
            .path()
            .join("config")
            .join("ota-updater")
            .join("config.toml")
    }

    /// Get a Command configured to run ota with this environment.
    pub fn cmd(&self) -> Command {
        let mut cmd = assert_cmd::cargo_bin_cmd!("ota");
        for var in ISOLATED_VARS {
            cmd.env_remove(var);
        }
        cmd.env("XDG_CONFIG_HOME", self.dir.path().join("config"));
        // Ensure no color codes pollute test output
        cmd.env("NO_COLOR", "1");
        cmd
    }
}

/// A port nothing is listening on at the time of the call.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
