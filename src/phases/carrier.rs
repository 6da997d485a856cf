//! Phase 4: Carrier (live).
//!
//! Builds the filesystem the installer medium itself boots: copy of base
//! plus the live package set, with the payload tarball, the component
//! binaries, the installer autostart unit, and offline bootloader packages
//! embedded inside it.
//!
//! The cache entry is taken right after package installation and kernel
//! staging, before any version-specific step, so a hit skips apt entirely
//! while embedding and branding always re-run.

use anyhow::{bail, Result};
use std::path::Path;

use super::{step, Phase};
use crate::brand;
use crate::cache::ArtifactCache;
use crate::components;
use crate::config::{self, Config};
use crate::fsops;
use crate::process;
use crate::shell;

/// Cache entry name for the package-installed carrier rootfs.
pub const CACHE_ENTRY: &str = "carrier";

pub fn run(config: &Config, cache: Option<&ArtifactCache>, version: &str) -> Result<()> {
    println!("=== Phase 4: Carrier ===");
    let rootfs = config.carrier_rootfs_dir();

    let mut from_cache = false;
    if let Some(cache) = cache {
        if cache.has_entry(CACHE_ENTRY) {
            println!("Found cached carrier rootfs, restoring...");
            match cache.restore(CACHE_ENTRY, &rootfs) {
                Ok(()) => from_cache = true,
                Err(e) => {
                    eprintln!(
                        "[WARN] Failed to restore carrier rootfs from cache: {:#}",
                        e
                    );
                    fsops::remove_all(&rootfs)?;
                }
            }
        }
    }

    if !from_cache {
        step(Phase::Carrier, "copy base rootfs", || {
            println!("Copying base rootfs...");
            fsops::copy_tree(&config.base_rootfs_dir(), &rootfs)
        })?;

        let mount = cache.and_then(|c| match c.mount_package_cache(&rootfs) {
            Ok(mount) => Some(mount),
            Err(e) => {
                eprintln!(
                    "[WARN] Failed to mount APT cache, continuing without it: {:#}",
                    e
                );
                None
            }
        });

        let install_result = install_live_system(&rootfs);

        if let Some(mount) = mount {
            mount.unmount();
        }
        install_result?;

        // Snapshot now, before any version-specific content lands.
        if let Some(cache) = cache {
            if let Err(e) = cache.save(CACHE_ENTRY, &rootfs) {
                eprintln!("[WARN] Failed to cache carrier rootfs: {:#}", e);
            }
        }
    }

    // Version- and build-specific work; runs on cache hits too. Bundling
    // downloads bootloader packages, so the shared cache gets mounted a
    // second time within this build.
    let mount = cache.and_then(|c| match c.mount_package_cache(&rootfs) {
        Ok(mount) => Some(mount),
        Err(e) => {
            eprintln!(
                "[WARN] Failed to mount APT cache, continuing without it: {:#}",
                e
            );
            None
        }
    });

    let embed_result = embed_and_configure(config, &rootfs, version);

    if let Some(mount) = mount {
        mount.unmount();
    }
    embed_result?;

    step(Phase::Carrier, "clean APT directories", || {
        cleanup_apt_directories(&rootfs)
    })?;

    println!("Phase 4 complete: Carrier rootfs ready\n");
    Ok(())
}

/// Install live packages and stage the kernel under generic names.
fn install_live_system(rootfs: &Path) -> Result<()> {
    step(Phase::Carrier, "install live packages", || {
        println!("Installing live environment packages...");
        process::run_in_chroot_streamed(
            rootfs,
            &format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {}",
                config::LIVE_PACKAGES
            ),
        )?;
        Ok(())
    })?;

    step(Phase::Carrier, "configure initramfs modules", || {
        process::run_in_chroot(
            rootfs,
            "printf 'amdgpu\\ni915\\nnouveau\\nradeon\\n' >> /etc/initramfs-tools/modules",
        )?;
        Ok(())
    })?;

    step(Phase::Carrier, "stage kernel and initrd", || {
        copy_kernel_and_initrd(rootfs)
    })?;

    Ok(())
}

/// Copy the versioned kernel and initrd to the standard paths boot loaders
/// reference. The highest installed version wins.
fn copy_kernel_and_initrd(rootfs: &Path) -> Result<()> {
    let boot = rootfs.join("boot");

    let Some(kernel) = fsops::find_latest_match(&boot, "vmlinuz-") else {
        bail!("Kernel not found in {}", boot.display());
    };
    fsops::copy_file(&kernel, &boot.join("vmlinuz"))?;

    let Some(initrd) = fsops::find_latest_match(&boot, "initrd.img-") else {
        bail!("Initrd not found in {}", boot.display());
    };
    fsops::copy_file(&initrd, &boot.join("initrd.img"))?;

    Ok(())
}

/// Everything that depends on this build's version or artifacts.
fn embed_and_configure(config: &Config, rootfs: &Path, version: &str) -> Result<()> {
    step(Phase::Carrier, "embed payload tarball", || {
        println!("Embedding payload tarball into carrier rootfs...");
        fsops::copy_file(
            &config.payload_tarball(),
            &rootfs.join(config::EMBEDDED_PAYLOAD_PATH),
        )
    })?;

    step(Phase::Carrier, "install components", || {
        components::install_components(rootfs, &config.components_dir(), components::MANIFEST)
    })?;

    step(Phase::Carrier, "brand carrier rootfs", || {
        println!("Applying carrier branding...");
        brand::write_os_identity(rootfs, version)?;
        brand::configure_splash(rootfs, &config.splash_logo)
    })?;

    step(Phase::Carrier, "configure installer autostart", || {
        configure_autostart(rootfs)
    })?;

    step(Phase::Carrier, "bundle bootloader packages", || {
        bundle_bootloader_packages(rootfs)
    })?;

    Ok(())
}

/// Autostart the installation wizard on tty1 at boot.
fn configure_autostart(rootfs: &Path) -> Result<()> {
    println!("Configuring installer autostart...");

    let service = format!(
        "[Unit]\n\
         Description={os_name} Installation Wizard\n\
         After=systemd-user-sessions.service\n\
         After=plymouth-quit-wait.service\n\
         \n\
         [Service]\n\
         Type=simple\n\
         Environment=PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\
         ExecStart=/{bin_path}/{binary}\n\
         StandardInput=tty\n\
         StandardOutput=tty\n\
         TTYPath=/dev/tty1\n\
         TTYReset=yes\n\
         TTYVHangup=yes\n\
         Restart=on-failure\n\
         RestartSec=1\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        os_name = config::OS_NAME,
        bin_path = config::INSTALL_BIN_PATH,
        binary = config::INSTALLER_BINARY_NAME,
    );

    let systemd_dir = rootfs.join("etc/systemd/system");
    let unit_name = format!("{}.service", config::INSTALLER_SERVICE_NAME);
    fsops::write_file(&systemd_dir.join(&unit_name), &service)?;

    // Enable without running systemctl in the chroot: the wants symlink is
    // all `systemctl enable` would create.
    fsops::symlink_replace(
        &format!("../{}", unit_name),
        &systemd_dir.join("multi-user.target.wants").join(&unit_name),
    )?;

    // Boot to multi-user; the installer owns tty1, so getty must not race
    // it there.
    fsops::symlink_replace(
        "/lib/systemd/system/multi-user.target",
        &systemd_dir.join("default.target"),
    )?;
    fsops::symlink_replace("/dev/null", &systemd_dir.join("getty@tty1.service"))?;

    Ok(())
}

/// Download BIOS and EFI bootloader packages into the carrier for the
/// installer to use offline.
fn bundle_bootloader_packages(rootfs: &Path) -> Result<()> {
    println!("Bundling bootloader packages into carrier rootfs...");

    // apt-get download needs current package lists; cleanup may have
    // removed them on a cached rootfs.
    process::run_in_chroot_streamed(rootfs, "apt-get update")?;

    for (dir, packages) in [
        (config::PACKAGES_BIOS_DIR, config::BIOS_PACKAGES),
        (config::PACKAGES_EFI_DIR, config::EFI_PACKAGES),
    ] {
        fsops::mkdir_p(&rootfs.join(dir))?;

        // apt-get download drops .debs into the working directory, so the
        // script must cd first; the composed pipeline is why the directory
        // gets shell-quoted.
        let script = format!(
            "cd {} && apt-get download {}",
            shell::quote(&format!("/{}", dir)),
            packages
        );
        process::run_in_chroot_streamed(rootfs, &script)?;
    }

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
