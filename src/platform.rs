use std::env;
use std::path::PathBuf;

use directories::ProjectDirs;

const APP_NAME: &str = "ota-updater";

/// Get the config directory for ota-updater.
///
/// `XDG_CONFIG_HOME` wins when set, so tests and containers can redirect it;
/// otherwise the platform's usual location is used.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join(APP_NAME));
    }
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}
