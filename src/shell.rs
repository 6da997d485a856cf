//! Shell quoting for values embedded in composed pipelines.
//!
//! New code passes arguments as argv entries through [`crate::process::Cmd`]
//! and needs no quoting. This module exists for the handful of places that
//! must hand a composed script to `sh -c` (e.g. `cd <dir> && apt-get
//! download ...` inside a chroot); any dynamic value spliced into such a
//! script goes through [`quote`] first.

use anyhow::{bail, Result};
use std::path::Path;

/// Quote a string as a single POSIX shell word.
///
/// Wraps the input in single quotes; each embedded single quote is replaced
/// with `'\''` (close quote, escaped quote, reopen quote). The result
/// evaluates back to exactly the input for any string not containing NUL.
pub fn quote(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('\'');
    for c in input.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Quote a path for embedding in a composed shell script.
///
/// Empty paths are rejected: an empty word would silently vanish from the
/// command line (or turn `rm -rf ''` into a no-op that hides a bug).
pub fn quote_path(path: &Path) -> Result<String> {
    let s = path.to_string_lossy();
    if s.is_empty() {
        bail!("refusing to quote an empty path");
    }
    Ok(quote(&s))
}
