//! Platform detection for selecting the correct release asset.

use std::fmt;

/// Operating system and CPU architecture, in the identifiers release assets
/// are named with (`linux`, `darwin`, `windows` / `amd64`, `arm64`, `386`, `arm`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub platform: String,
    pub arch: String,
}

impl Target {
    pub fn new(platform: &str, arch: &str) -> Self {
        Self {
            platform: platform.to_string(),
            arch: arch.to_string(),
        }
    }

    /// The target this process was compiled for.
    pub fn current() -> Self {
        Self::new(
            normalize_os(std::env::consts::OS),
            normalize_arch(std::env::consts::ARCH),
        )
    }

    /// Substring an asset name must contain to match this target.
    pub fn asset_key(&self) -> String {
        format!("{}-{}", self.platform, self.arch)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.arch)
    }
}

fn normalize_os(os: &str) -> &str {
    match os {
        "macos" => "darwin",
        other => other,
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64",
        other => other,
    }
}
