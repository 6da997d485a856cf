//! Version tag validation and normalization.
//!
//! Build versions are semantic versions with an optional `v` prefix
//! (`1.2.3` or `v1.2.3`). The prefix is a tagging convention only; branded
//! identity files and the ISO filename always use the bare form.

use anyhow::{bail, Result};
use semver::Version;

/// Strip an optional leading `v`/`V` from a version tag.
pub fn strip_prefix(tag: &str) -> &str {
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

/// Parse a version tag, accepting an optional `v` prefix.
pub fn parse(tag: &str) -> Result<Version> {
    let bare = strip_prefix(tag);
    match Version::parse(bare) {
        Ok(v) => Ok(v),
        Err(_) => bail!(
            "Invalid version format: {} (expected: X.Y.Z or vX.Y.Z)",
            tag
        ),
    }
}

/// Validate a version tag without keeping the parse result.
pub fn validate(tag: &str) -> Result<()> {
    parse(tag).map(|_| ())
}
