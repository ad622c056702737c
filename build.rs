fn main() {
    println!("cargo:rerun-if-env-changed=OTA_BUILD_VERSION");

    let version = std::env::var("OTA_BUILD_VERSION")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));

    println!("cargo:rustc-env=OTA_VERSION={version}");
}
