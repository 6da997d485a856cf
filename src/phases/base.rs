//! Phase 2: Base.
//!
//! Builds the minimal, version-independent rootfs both the payload and the
//! carrier derive from: debootstrap, initial APT sources, package list
//! update, initramfs pre-seeding, and an aggressive size strip. The result
//! is the most expensive and most cacheable artifact of the build.

use anyhow::Result;
use std::path::Path;

use super::{step, Phase};
use crate::cache::ArtifactCache;
use crate::config::{self, Config};
use crate::fsops;
use crate::process::{self, Cmd};

/// Cache entry name for the stripped base rootfs.
pub const CACHE_ENTRY: &str = "base";

pub fn run(config: &Config, cache: Option<&ArtifactCache>) -> Result<()> {
    println!("=== Phase 2: Base ===");
    let rootfs = config.base_rootfs_dir();

    if let Some(cache) = cache {
        if cache.has_entry(CACHE_ENTRY) {
            println!("Found cached base rootfs, restoring...");
            match cache.restore(CACHE_ENTRY, &rootfs) {
                Ok(()) => {
                    println!("Phase 2 complete: Base rootfs restored from cache\n");
                    return Ok(());
                }
                Err(e) => {
                    // A partial restore is not a usable rootfs; remove it
                    // before falling back to a fresh build.
                    eprintln!("[WARN] Failed to restore base rootfs from cache: {:#}", e);
                    fsops::remove_all(&rootfs)?;
                }
            }
        }
    }

    step(Phase::Base, "bootstrap base system", || create(&rootfs))?;
    step(Phase::Base, "strip base system", || strip(&rootfs))?;

    if let Some(cache) = cache {
        if let Err(e) = cache.save(CACHE_ENTRY, &rootfs) {
            eprintln!("[WARN] Failed to cache base rootfs: {:#}", e);
        }
    }

    println!("Phase 2 complete: Base rootfs ready\n");
    Ok(())
}

fn create(rootfs: &Path) -> Result<()> {
    println!("Creating base rootfs at {}", rootfs.display());

    Cmd::new("debootstrap")
        .arg("--variant=minbase")
        .arg(config::DEBIAN_RELEASE)
        .arg_path(rootfs)
        .error_msg("debootstrap failed")
        .run_streamed()?;

    // Enable Debian's non-free-firmware section. Starting with Debian 12,
    // essential firmware for modern hardware (GPU, Wi-Fi) ships separately
    // from main.
    println!("Configuring apt sources...");
    fsops::write_file(
        &rootfs.join("etc/apt/sources.list"),
        &format!(
            "deb http://deb.debian.org/debian {} main non-free-firmware\n",
            config::DEBIAN_RELEASE
        ),
    )?;

    println!("Updating package lists...");
    process::run_in_chroot_streamed(rootfs, "apt-get update")?;

    // Pre-create initramfs configuration before any kernel package is
    // installed: installing linux-image-* triggers update-initramfs, which
    // reads /etc/initramfs-tools/ at that moment. conf.d drop-ins survive
    // package installation; files like /etc/initramfs-tools/modules are
    // dpkg conffiles that get replaced when initramfs-tools installs.
    println!("Pre-configuring initramfs for hardware support...");
    // MODULES=most includes drivers for hardware not present on the build
    // host (VMs, NVMe, USB); the default MODULES=dep breaks when the ISO
    // boots elsewhere.
    fsops::write_file(
        &rootfs.join("etc/initramfs-tools/conf.d/driver-policy.conf"),
        "MODULES=most\n",
    )?;

    println!("Base rootfs created successfully");
    Ok(())
}

fn strip(rootfs: &Path) -> Result<()> {
    println!("Stripping base rootfs at {}", rootfs.display());

    for doc_dir in ["usr/share/doc", "usr/share/man", "usr/share/info"] {
        fsops::remove_all(&rootfs.join(doc_dir))?;
    }

    // Remove non-English locales.
    let locale_dir = rootfs.join("usr/share/locale");
    if locale_dir.exists() {
        Cmd::new("find")
            .arg_path(&locale_dir)
            .args(["-mindepth", "1", "-maxdepth", "1"])
            .args(["!", "-name", "en*"])
            .args(["-exec", "rm", "-rf", "{}", "+"])
            .error_msg("Failed to remove non-English locales")
            .run()?;
    }

    // Mask rfkill units; there is no RF hardware to manage.
    let systemd_dir = rootfs.join("etc/systemd/system");
    fsops::symlink_replace("/dev/null", &systemd_dir.join("systemd-rfkill.service"))?;
    fsops::symlink_replace("/dev/null", &systemd_dir.join("systemd-rfkill.socket"))?;

    // Clear MOTD files that print Debian messages on login.
    fsops::write_file(&rootfs.join("etc/motd"), "")?;
    fsops::remove_all(&rootfs.join("etc/update-motd.d"))?;

    println!("Base rootfs stripped successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_strip_removes_docs_and_masks_rfkill() {
        let temp = TempDir::new().unwrap();
        let rootfs = temp.path();
        fs::create_dir_all(rootfs.join("usr/share/doc/pkg")).unwrap();
        fs::create_dir_all(rootfs.join("usr/share/man/man1")).unwrap();
        fs::create_dir_all(rootfs.join("etc/update-motd.d")).unwrap();
        fs::write(rootfs.join("etc/motd"), "Debian GNU/Linux 12\n").unwrap();

        strip(rootfs).unwrap();

        assert!(!rootfs.join("usr/share/doc").exists());
        assert!(!rootfs.join("usr/share/man").exists());
        assert!(!rootfs.join("etc/update-motd.d").exists());
        assert_eq!(fs::read_to_string(rootfs.join("etc/motd")).unwrap(), "");
        assert_eq!(
            fs::read_link(rootfs.join("etc/systemd/system/systemd-rfkill.service")).unwrap(),
            std::path::PathBuf::from("/dev/null")
        );
    }

    #[test]
    fn test_strip_keeps_english_locales() {
        let temp = TempDir::new().unwrap();
        let rootfs = temp.path();
        fs::create_dir_all(rootfs.join("usr/share/locale/en")).unwrap();
        fs::create_dir_all(rootfs.join("usr/share/locale/en_GB")).unwrap();
        fs::create_dir_all(rootfs.join("usr/share/locale/de")).unwrap();
        fs::create_dir_all(rootfs.join("usr/share/locale/fr")).unwrap();

        strip(rootfs).unwrap();

        assert!(rootfs.join("usr/share/locale/en").exists());
        assert!(rootfs.join("usr/share/locale/en_GB").exists());
        assert!(!rootfs.join("usr/share/locale/de").exists());
        assert!(!rootfs.join("usr/share/locale/fr").exists());
    }
}
