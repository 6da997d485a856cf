//! Phase artifact caching.
//!
//! Bootstrapping and package installation dominate build wall-clock time
//! and are deterministic for a given Debian release, so each expensive
//! phase output is archived as a zstd-compressed tarball keyed by phase
//! name. Version-specific branding always re-runs after a restore, so a
//! hit is semantically equivalent to a fresh build.
//!
//! Entries are published atomically: the archive is written under
//! `<root>/tmp/` and renamed into place, so [`ArtifactCache::has_entry`]
//! can never observe a partially written file. A sha256 sidecar is checked
//! on restore; a mismatch is corruption, reported as an error the caller
//! treats as a cache miss.
//!
//! There is no locking and no expiry. Two concurrent builds against one
//! cache root are unsupported; the operator serializes them.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Builder as TarBuilder;
use walkdir::WalkDir;

use crate::process::Cmd;

/// Subdirectory of the cache root holding the shared APT package cache.
const APT_CACHE_SUBDIR: &str = "apt";

/// APT's package download directory, relative to a rootfs.
const APT_ARCHIVES_DIR: &str = "var/cache/apt/archives";

/// Cache of per-phase rootfs snapshots plus the shared APT package cache.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    /// Open (and create if needed) the cache at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let cache = Self {
            root: root.to_path_buf(),
        };
        fs::create_dir_all(cache.tmp_dir())
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;
        fs::create_dir_all(cache.apt_dir())
            .context("Failed to create shared APT cache directory")?;
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn apt_dir(&self) -> PathBuf {
        self.root.join(APT_CACHE_SUBDIR)
    }

    /// Path of the archive for a phase name.
    pub fn entry_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.tar.zst", name))
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.tar.zst.sha256", name))
    }

    /// True iff a published archive exists for `name`.
    ///
    /// Presence implies a completed save: writers go through a temp file
    /// and rename, so a crash mid-save leaves nothing at this path.
    pub fn has_entry(&self, name: &str) -> bool {
        validate_name(name).is_ok() && self.entry_path(name).exists()
    }

    /// Archive `dir` as the cache entry for `name`.
    ///
    /// The tar preserves numeric uid/gid, permissions, and symlinks;
    /// entries are added in sorted order so identical trees produce
    /// identical archives.
    pub fn save(&self, name: &str, dir: &Path) -> Result<()> {
        validate_name(name)?;
        if !dir.is_dir() {
            bail!("Source directory not found: {}", dir.display());
        }

        let tmp = self.tmp_dir().join(format!("{}.partial", name));
        // A leftover from a crashed save is garbage; start clean.
        let _ = fs::remove_file(&tmp);

        create_tar_zst(dir, &tmp)
            .with_context(|| format!("Failed to archive {}", dir.display()))?;

        let (sha, _size) = sha256_file(&tmp)?;
        fs::write(self.sidecar_path(name), format!("{}\n", sha))
            .context("Failed to write cache checksum")?;

        // Publish: only after the archive is complete does it become visible.
        fs::rename(&tmp, self.entry_path(name)).with_context(|| {
            format!("Failed to publish cache entry '{}'", name)
        })?;

        Ok(())
    }

    /// Extract the cache entry for `name` into `dest`.
    ///
    /// On any failure the destination must be treated as unusable; callers
    /// remove it before falling back to a fresh build.
    pub fn restore(&self, name: &str, dest: &Path) -> Result<()> {
        validate_name(name)?;
        let archive_path = self.entry_path(name);
        if !archive_path.exists() {
            bail!("No cache entry for '{}'", name);
        }

        // Verify the content hash when the sidecar exists. Entries written
        // by older builders without a sidecar are trusted as-is.
        let sidecar = self.sidecar_path(name);
        if sidecar.exists() {
            let expected = fs::read_to_string(&sidecar)
                .context("Failed to read cache checksum")?
                .trim()
                .to_string();
            let (actual, _) = sha256_file(&archive_path)?;
            if actual != expected {
                bail!(
                    "Cache entry '{}' is corrupt (checksum mismatch)\n  expected: {}\n  actual:   {}",
                    name,
                    expected,
                    actual
                );
            }
        }

        fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let file = File::open(&archive_path)
            .with_context(|| format!("Failed to open {}", archive_path.display()))?;
        let decoder = zstd::stream::Decoder::new(file)?;
        let mut archive = tar::Archive::new(decoder);
        archive.set_preserve_permissions(true);
        archive.set_preserve_ownerships(true);
        archive
            .unpack(dest)
            .with_context(|| format!("Failed to extract cache entry '{}'", name))?;

        Ok(())
    }

    /// Bind-mount the shared APT package cache into a rootfs.
    ///
    /// Downloaded .deb files are shared across builds and across the
    /// payload/carrier phases of one build. The returned guard unmounts on
    /// drop; it must be released before the rootfs is archived or deleted,
    /// or the host cache contents leak into the snapshot.
    pub fn mount_package_cache(&self, rootfs: &Path) -> Result<PackageCacheMount> {
        let mount_point = rootfs.join(APT_ARCHIVES_DIR);
        fs::create_dir_all(&mount_point)
            .context("Failed to create APT cache mount point")?;

        Cmd::new("mount")
            .arg("--bind")
            .arg_path(&self.apt_dir())
            .arg_path(&mount_point)
            .error_msg("Failed to bind-mount shared APT cache")
            .run()?;

        Ok(PackageCacheMount {
            mount_point,
            mounted: true,
        })
    }
}

/// Guard for a mounted shared package cache.
///
/// Unmounting is attempted exactly once, explicitly via [`unmount`] or on
/// drop for error paths. Failure to unmount is logged, never escalated: it
/// must not mask the error that put us on the cleanup path.
///
/// [`unmount`]: PackageCacheMount::unmount
#[derive(Debug)]
pub struct PackageCacheMount {
    mount_point: PathBuf,
    mounted: bool,
}

impl PackageCacheMount {
    /// Unmount the package cache now.
    pub fn unmount(mut self) {
        self.unmount_once();
    }

    fn unmount_once(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;

        let result = Cmd::new("umount")
            .arg_path(&self.mount_point)
            .allow_fail()
            .run();
        match result {
            Ok(r) if r.success() => {}
            _ => eprintln!(
                "[WARN] Failed to unmount APT cache at {} (may be already unmounted)",
                self.mount_point.display()
            ),
        }
    }
}

impl Drop for PackageCacheMount {
    fn drop(&mut self) {
        self.unmount_once();
    }
}

/// Reject phase names that would escape the cache root.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("cache entry name must not be empty");
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        bail!("cache entry name must be a plain filename segment: {}", name);
    }
    Ok(())
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// Write a deterministic zstd-compressed tar of `src_dir` to `out_path`.
///
/// Entries use relative paths, numeric uid/gid, and the source's mode and
/// mtime. Device-special files do not occur in a pre-first-boot rootfs and
/// are skipped.
fn create_tar_zst(src_dir: &Path, out_path: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::fs::PermissionsExt;

    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)?;
    let mut builder = TarBuilder::new(encoder);

    let mut entries: Vec<PathBuf> = WalkDir::new(src_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .map(|e| e.path().to_path_buf())
        .filter(|p| p != src_dir)
        .collect();
    entries.sort();

    for path in entries {
        let rel = path
            .strip_prefix(src_dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();

        let md = fs::symlink_metadata(&path)?;
        let mut header = tar::Header::new_gnu();
        header.set_mode(md.permissions().mode());
        header.set_uid(md.uid() as u64);
        header.set_gid(md.gid() as u64);
        header.set_mtime(md.mtime().max(0) as u64);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_link_name(target.to_string_lossy().as_ref())?;
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.is_file() {
            let mut file = File::open(&path)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut file)?;
        }
    }

    let encoder = builder
        .into_inner()
        .context("Failed to finalize cache archive")?;
    encoder.finish()?;
    Ok(())
}
