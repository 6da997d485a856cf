//! Phase 3: Payload (target).
//!
//! Builds the filesystem the installer will put on the end user's disk:
//! copy of base, target package set, branding, default user, then packaged
//! as a numeric-owner tarball for the carrier to embed. The working
//! directory is deleted once the tarball exists.
//!
//! The cache entry includes package installation and branding; since
//! branding always re-runs after a restore with the current version, a hit
//! only skips the expensive copy-and-install work.

use anyhow::Result;
use std::path::Path;

use super::{step, Phase};
use crate::brand;
use crate::cache::ArtifactCache;
use crate::config::{self, Config};
use crate::fsops;
use crate::process::{self, Cmd};

/// Cache entry name for the installed payload rootfs.
pub const CACHE_ENTRY: &str = "payload";

pub fn run(config: &Config, cache: Option<&ArtifactCache>, version: &str) -> Result<()> {
    println!("=== Phase 3: Payload ===");
    let rootfs = config.payload_rootfs_dir();
    let tarball = config.payload_tarball();

    if let Some(cache) = cache {
        if cache.has_entry(CACHE_ENTRY) {
            println!("Found cached payload rootfs, restoring...");
            match cache.restore(CACHE_ENTRY, &rootfs) {
                Ok(()) => {
                    // Version-specific steps always run, cache hit or not.
                    step(Phase::Payload, "brand payload rootfs", || {
                        apply_branding(config, &rootfs, version)
                    })?;
                    step(Phase::Payload, "package payload rootfs", || {
                        package(&rootfs, &tarball)
                    })?;
                    step(Phase::Payload, "remove payload working directory", || {
                        fsops::remove_all(&rootfs)
                    })?;
                    println!("Phase 3 complete: Payload rootfs restored from cache\n");
                    return Ok(());
                }
                Err(e) => {
                    eprintln!(
                        "[WARN] Failed to restore payload rootfs from cache: {:#}",
                        e
                    );
                    fsops::remove_all(&rootfs)?;
                }
            }
        }
    }

    step(Phase::Payload, "copy base rootfs", || {
        println!("Copying base rootfs...");
        fsops::copy_tree(&config.base_rootfs_dir(), &rootfs)
    })?;

    // Shared package cache for the apt work below; losing it costs
    // re-downloads, not correctness.
    let mount = cache.and_then(|c| match c.mount_package_cache(&rootfs) {
        Ok(mount) => Some(mount),
        Err(e) => {
            eprintln!("[WARN] Failed to mount APT cache, continuing without it: {:#}", e);
            None
        }
    });

    let build_result = build(config, &rootfs, version);

    // Unmount before the rootfs is archived, packaged, or deleted, also on
    // the error path; otherwise the host's shared cache contents leak into
    // the snapshot.
    if let Some(mount) = mount {
        mount.unmount();
    }
    build_result?;

    step(Phase::Payload, "clean APT directories", || {
        cleanup_apt_directories(&rootfs)
    })?;

    if let Some(cache) = cache {
        if let Err(e) = cache.save(CACHE_ENTRY, &rootfs) {
            eprintln!("[WARN] Failed to cache payload rootfs: {:#}", e);
        }
    }

    step(Phase::Payload, "package payload rootfs", || {
        package(&rootfs, &tarball)
    })?;
    step(Phase::Payload, "remove payload working directory", || {
        fsops::remove_all(&rootfs)
    })?;

    println!("Phase 3 complete: Payload rootfs packaged\n");
    Ok(())
}

/// Package installation and branding; runs with the APT cache mounted.
fn build(config: &Config, rootfs: &Path, version: &str) -> Result<()> {
    step(Phase::Payload, "install target packages", || {
        println!("Installing target system packages...");
        // DEBIAN_FRONTEND=noninteractive prevents prompts from locales,
        // console-setup, and keyboard-configuration.
        process::run_in_chroot_streamed(
            rootfs,
            &format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {}",
                config::TARGET_PACKAGES
            ),
        )?;
        Ok(())
    })?;

    step(Phase::Payload, "configure initramfs modules", || {
        // GPU drivers for early KMS. Must happen AFTER package install
        // because dpkg overwrites pre-seeded files; update-initramfs will
        // pick this up when branding touches the kernel next.
        process::run_in_chroot(
            rootfs,
            "printf 'amdgpu\\ni915\\nnouveau\\nradeon\\n' >> /etc/initramfs-tools/modules",
        )?;
        Ok(())
    })?;

    step(Phase::Payload, "brand payload rootfs", || {
        apply_branding(config, rootfs, version)
    })?;

    step(Phase::Payload, "create default user", || {
        brand::create_default_user(rootfs)
    })?;

    Ok(())
}

/// Payload branding: identity, splash, silent GRUB, full APT sources,
/// networking.
fn apply_branding(config: &Config, rootfs: &Path, version: &str) -> Result<()> {
    println!("Applying payload branding...");
    brand::write_os_identity(rootfs, version)?;
    brand::configure_splash(rootfs, &config.splash_logo)?;
    brand::configure_grub_defaults(rootfs)?;
    brand::write_apt_sources(rootfs)?;
    brand::enable_networking(rootfs)?;
    Ok(())
}

/// Remove downloaded packages and package lists, keeping the directories.
fn cleanup_apt_directories(rootfs: &Path) -> Result<()> {
    let apt_cache = rootfs.join("var/cache/apt");
    fsops::remove_all(&apt_cache)?;
    fsops::mkdir_p(&apt_cache.join("archives"))?;

    let apt_lists = rootfs.join("var/lib/apt/lists");
    fsops::remove_all(&apt_lists)?;
    fsops::mkdir_p(&apt_lists)?;
    Ok(())
}

/// Create the payload tarball the installer unpacks onto the target disk.
///
/// `--numeric-owner` preserves raw uid/gid without name mapping, so the
/// archive is independent of the build host's user database.
fn package(rootfs: &Path, tarball: &Path) -> Result<()> {
    println!("Packaging payload rootfs to {}", tarball.display());
    Cmd::new("tar")
        .args(["--numeric-owner", "-czf"])
        .arg_path(tarball)
        .arg("-C")
        .arg_path(rootfs)
        .arg(".")
        .error_msg("Failed to create payload tarball")
        .run()?;
    Ok(())
}
