//! Release version comparison.
//!
//! Versions are compared as plain strings after dropping one leading `v`.
//! This is not semantic-version ordering: `"9.0"` sorts after `"10.0"`.
//! Release tags are expected to keep a fixed width (e.g. zero-padded or
//! date-based) for the ordering to be meaningful. Everything that needs an
//! ordering goes through [`is_newer`] so the rule can be swapped in one place.

/// Strip a single optional leading `v`.
pub fn normalize(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Whether `candidate` should replace `current`.
///
/// Equal versions are never newer, so an up-to-date binary does not
/// reinstall itself.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    normalize(candidate) > normalize(current)
}
