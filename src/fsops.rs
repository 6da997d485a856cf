//! Filesystem operations for rootfs construction.
//!
//! Metadata-light operations use `std::fs` directly. Whole-tree copies go
//! through `cp -a` so ownership, hard links, and special permissions in the
//! bootstrapped rootfs survive; the builder runs as root, so `cp` sees and
//! preserves everything.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// Create a directory and all parents. Succeeds if it already exists.
pub fn mkdir_p(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

/// Write a file, truncating any existing content.
///
/// A failed write leaves the target in an undefined state; callers must
/// retry from scratch or abort, never resume.
pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent of {}", path.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Remove a file or directory tree. Succeeds if the path does not exist.
///
/// Cleanup code runs unconditionally on failure paths, so this must be safe
/// to call twice in a row.
pub fn remove_all(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
        Ok(md) if md.is_dir() => fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove {}", path.display())),
        Ok(_) => fs::remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Remove a single file. Succeeds if it does not exist.
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Copy a single file, overwriting the destination. Fails if `src` is missing.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        bail!("Source file not found: {}", src.display());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent of {}", dst.display()))?;
    }
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Copy a directory tree with `cp -a`, preserving ownership and permissions.
///
/// Used to derive one rootfs snapshot from another; `std::fs` copies would
/// lose uid/gid and special bits unless reimplemented per-entry.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("Source directory not found: {}", src.display());
    }
    Cmd::new("cp")
        .arg("-a")
        .arg_path(src)
        .arg_path(dst)
        .error_msg(format!(
            "Failed to copy {} to {}",
            src.display(),
            dst.display()
        ))
        .run()?;
    Ok(())
}

/// Create a symlink, replacing any existing file or link at `link_path`.
pub fn symlink_replace(target: &str, link_path: &Path) -> Result<()> {
    if let Some(parent) = link_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent of {}", link_path.display()))?;
    }
    if fs::symlink_metadata(link_path).is_ok() {
        fs::remove_file(link_path)
            .with_context(|| format!("Failed to replace {}", link_path.display()))?;
    }
    std::os::unix::fs::symlink(target, link_path)
        .with_context(|| format!("Failed to create symlink {}", link_path.display()))
}

/// chmod a path with a symbolic or octal mode string (e.g. "+x", "0755").
pub fn chmod(mode: &str, path: &Path) -> Result<()> {
    Cmd::new("chmod")
        .arg(mode)
        .arg_path(path)
        .error_msg(format!("Failed to chmod {} {}", mode, path.display()))
        .run()?;
    Ok(())
}

/// Find the entry in `dir` whose filename starts with `prefix`, picking the
/// highest version when several match.
///
/// Kernel packages drop versioned files (`vmlinuz-6.1.0-18-amd64`); when
/// more than one kernel is installed the version-aware sort makes the
/// newest win instead of depending on directory enumeration order.
pub fn find_latest_match(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    matches.sort_by(|a, b| {
        let an = a
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bn = b
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        natural_cmp(&an, &bn)
    });
    matches.pop()
}

/// Compare strings with embedded numbers compared numerically, so
/// `vmlinuz-6.1.0-18` orders above `vmlinuz-6.1.0-9`.
fn natural_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return std::cmp::Ordering::Equal,
            (None, Some(_)) => return std::cmp::Ordering::Less,
            (Some(_), None) => return std::cmp::Ordering::Greater,
            (Some(ac), Some(bc)) => {
                if ac.is_ascii_digit() && bc.is_ascii_digit() {
                    let mut an: u64 = 0;
                    while let Some(c) = ai.peek().filter(|c| c.is_ascii_digit()) {
                        an = an.saturating_mul(10).saturating_add(*c as u64 - '0' as u64);
                        ai.next();
                    }
                    let mut bn: u64 = 0;
                    while let Some(c) = bi.peek().filter(|c| c.is_ascii_digit()) {
                        bn = bn.saturating_mul(10).saturating_add(*c as u64 - '0' as u64);
                        bi.next();
                    }
                    match an.cmp(&bn) {
                        std::cmp::Ordering::Equal => {}
                        other => return other,
                    }
                } else {
                    match ac.cmp(&bc) {
                        std::cmp::Ordering::Equal => {
                            ai.next();
                            bi.next();
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mkdir_p_idempotent() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a/b/c");
        mkdir_p(&dir).unwrap();
        mkdir_p(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_write_file_truncates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("f");
        write_file(&path, "long original content").unwrap();
        write_file(&path, "short").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "short");
    }

    #[test]
    fn test_remove_all_missing_path_ok() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("never-created");
        remove_all(&path).unwrap();
        remove_all(&path).unwrap();
    }

    #[test]
    fn test_remove_all_twice_in_a_row() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("tree");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/file"), "x").unwrap();
        remove_all(&dir).unwrap();
        remove_all(&dir).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_remove_all_handles_files_and_symlinks() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("f");
        fs::write(&file, "x").unwrap();
        remove_all(&file).unwrap();
        assert!(!file.exists());

        // A dangling symlink must be removed, not treated as missing.
        let link = temp.path().join("dangling");
        std::os::unix::fs::symlink("/nonexistent", &link).unwrap();
        remove_all(&link).unwrap();
        assert!(fs::symlink_metadata(&link).is_err());
    }

    #[test]
    fn test_copy_file_overwrites_and_fails_on_missing_src() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::write(&src, "new").unwrap();
        fs::write(&dst, "old").unwrap();
        copy_file(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "new");

        assert!(copy_file(&temp.path().join("missing"), &dst).is_err());
    }

    #[test]
    fn test_copy_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/file"), "data").unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("sub/file")).unwrap(), "data");
    }

    #[test]
    fn test_symlink_replace() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("link");
        symlink_replace("/dev/null", &link).unwrap();
        symlink_replace("/dev/zero", &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/dev/zero"));
    }

    #[test]
    fn test_find_latest_match_picks_highest_version() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("vmlinuz-6.1.0-9-amd64"), "").unwrap();
        fs::write(temp.path().join("vmlinuz-6.1.0-18-amd64"), "").unwrap();
        fs::write(temp.path().join("initrd.img-6.1.0-18-amd64"), "").unwrap();

        let found = find_latest_match(temp.path(), "vmlinuz-").unwrap();
        assert_eq!(
            found.file_name().unwrap().to_str().unwrap(),
            "vmlinuz-6.1.0-18-amd64"
        );
    }

    #[test]
    fn test_natural_cmp_numeric_chunks() {
        use std::cmp::Ordering;
        assert_eq!(natural_cmp("a-9", "a-18"), Ordering::Less);
        assert_eq!(natural_cmp("a-18", "a-18"), Ordering::Equal);
        assert_eq!(natural_cmp("a-2", "b-1"), Ordering::Less);
    }

    #[test]
    fn test_find_latest_match_none() {
        let temp = TempDir::new().unwrap();
        assert!(find_latest_match(temp.path(), "vmlinuz-").is_none());
    }
}
