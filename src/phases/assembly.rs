//! Phase 5: Assembly.
//!
//! Turns the carrier rootfs into a bootable hybrid ISO: GRUB and isolinux
//! configs in a staging tree, the carrier compressed into a squashfs, a
//! FAT EFI boot image, and finally `xorriso -as mkisofs` over the lot.
//! Staging is removed afterwards with bounded retries.

use anyhow::Result;
use std::path::{Path, PathBuf};

use super::{cleanup_with_retries, step, Phase};
use crate::config::{self, Config};
use crate::fsops;
use crate::process::Cmd;

/// Size of the FAT EFI boot image. Enough for the GRUB EFI binary plus
/// filesystem overhead.
const EFI_IMAGE_SIZE_MB: u32 = 4;

pub fn run(config: &Config, version: &str) -> Result<PathBuf> {
    println!("=== Phase 5: Assembly ===");

    let carrier = config.carrier_rootfs_dir();
    let staging = config.staging_dir();
    let iso_path = config.iso_path(version);

    let result = assemble(config, &carrier, &staging, &iso_path);

    // Staging is pure scratch; remove it on success and failure alike.
    cleanup_with_retries(&staging);
    result?;

    println!("Phase 5 complete: ISO created at {}\n", iso_path.display());
    Ok(iso_path)
}

fn assemble(config: &Config, carrier: &Path, staging: &Path, iso_path: &Path) -> Result<()> {
    step(Phase::Assembly, "create staging directory", || {
        fsops::mkdir_p(&staging.join("live"))?;
        fsops::mkdir_p(&staging.join("boot/grub"))?;
        fsops::mkdir_p(&staging.join("isolinux"))
    })?;

    // Boot files must be copied out before the carrier is stripped of them.
    step(Phase::Assembly, "copy boot files", || {
        fsops::copy_file(&carrier.join("boot/vmlinuz"), &staging.join("boot/vmlinuz"))?;
        fsops::copy_file(
            &carrier.join("boot/initrd.img"),
            &staging.join("boot/initrd.img"),
        )
    })?;

    step(Phase::Assembly, "write GRUB configuration", || {
        write_grub_config(staging)
    })?;

    step(Phase::Assembly, "write isolinux configuration", || {
        write_isolinux_config(config, staging)
    })?;

    step(Phase::Assembly, "strip boot files from carrier", || {
        strip_carrier_boot(carrier)
    })?;

    step(Phase::Assembly, "create squashfs", || {
        println!("Creating squashfs filesystem...");
        Cmd::new("mksquashfs")
            .arg_path(carrier)
            .arg_path(&staging.join("live/filesystem.squashfs"))
            .args(["-comp", "xz"])
            .arg("-noappend")
            .error_msg("mksquashfs failed. Install squashfs-tools.")
            .run_streamed()?;
        Ok(())
    })?;

    step(Phase::Assembly, "create EFI boot image", || {
        create_efi_boot_image(config, staging)
    })?;

    step(Phase::Assembly, "assemble hybrid ISO", || {
        println!("Running xorriso to create hybrid ISO...");
        Cmd::new("xorriso")
            .args(["-as", "mkisofs", "-o"])
            .arg_path(iso_path)
            .arg("-isohybrid-mbr")
            .arg_path(&config.isohdpfx_bin)
            .args(["-c", "isolinux/boot.cat"])
            .args(["-b", "isolinux/isolinux.bin"])
            .args(["-no-emul-boot", "-boot-load-size", "4", "-boot-info-table"])
            .arg("-eltorito-alt-boot")
            .args(["-e", "boot/grub/efiboot.img"])
            .args(["-no-emul-boot", "-isohybrid-gpt-basdat"])
            .arg_path(staging)
            .error_msg("xorriso failed. Install xorriso.")
            .run_streamed()?;
        Ok(())
    })?;

    Ok(())
}

/// GRUB menu for the live ISO. Graphics mode from the first frame so the
/// "GRUB" banner never flashes before the splash.
fn write_grub_config(staging: &Path) -> Result<()> {
    let grub_cfg = format!(
        "# Switch to graphics mode immediately to clear boot text.\n\
         insmod all_video\n\
         insmod gfxterm\n\
         set gfxmode=auto\n\
         terminal_output gfxterm\n\
         clear\n\
         \n\
         set gfxpayload=keep\n\
         set default=0\n\
         set timeout_style=hidden\n\
         set timeout=0\n\
         \n\
         menuentry \"{} Installer\" {{\n\
         \x20   linux /boot/vmlinuz {}\n\
         \x20   initrd /boot/initrd.img\n\
         }}\n",
        config::OS_NAME,
        config::LIVE_KERNEL_PARAMS,
    );
    fsops::write_file(&staging.join("boot/grub/grub.cfg"), &grub_cfg)
}

/// isolinux config plus the loader binaries copied from the host.
fn write_isolinux_config(config: &Config, staging: &Path) -> Result<()> {
    let isolinux_dir = staging.join("isolinux");

    fsops::copy_file(&config.isolinux_bin, &isolinux_dir.join("isolinux.bin"))?;
    fsops::copy_file(&config.ldlinux_c32, &isolinux_dir.join("ldlinux.c32"))?;

    let isolinux_cfg = format!(
        "DEFAULT {id}\n\
         TIMEOUT 0\n\
         PROMPT 0\n\
         \n\
         LABEL {id}\n\
         \x20   MENU LABEL {name} Installer\n\
         \x20   KERNEL /boot/vmlinuz\n\
         \x20   APPEND initrd=/boot/initrd.img {params}\n",
        id = config::OS_ID,
        name = config::OS_NAME,
        params = config::LIVE_KERNEL_PARAMS,
    );
    fsops::write_file(&isolinux_dir.join("isolinux.cfg"), &isolinux_cfg)
}

/// Remove kernel images from the carrier before squashing; they live in
/// the staging tree now and cost ~100MB inside the squashfs.
fn strip_carrier_boot(carrier: &Path) -> Result<()> {
    println!("Removing boot files from carrier rootfs...");
    let boot = carrier.join("boot");

    Cmd::new("find")
        .arg_path(&boot)
        .args(["-maxdepth", "1"])
        .args(["(", "-name", "vmlinuz-*"])
        .args(["-o", "-name", "initrd.img-*"])
        .args(["-o", "-name", "config-*"])
        .args(["-o", "-name", "System.map-*", ")"])
        .args(["-type", "f", "-delete"])
        .allow_fail()
        .run()?;

    fsops::remove_file(&boot.join("vmlinuz"))?;
    fsops::remove_file(&boot.join("initrd.img"))?;
    Ok(())
}

/// Build the FAT image holding the GRUB EFI binary for UEFI boot.
fn create_efi_boot_image(config: &Config, staging: &Path) -> Result<()> {
    let efi_img = staging.join("boot/grub/efiboot.img");
    let efi_mount = staging.join("efi_mount");

    Cmd::new("dd")
        .arg("if=/dev/zero")
        .arg(format!("of={}", efi_img.display()))
        .arg("bs=1M")
        .arg(format!("count={}", EFI_IMAGE_SIZE_MB))
        .error_msg("Failed to create EFI image")
        .run()?;

    Cmd::new("mkfs.fat")
        .args(["-F", "12"])
        .arg_path(&efi_img)
        .error_msg("mkfs.fat failed. Install dosfstools.")
        .run()?;

    fsops::mkdir_p(&efi_mount)?;
    Cmd::new("mount")
        .args(["-o", "loop"])
        .arg_path(&efi_img)
        .arg_path(&efi_mount)
        .error_msg("Failed to loop-mount EFI image")
        .run()?;

    // Everything between mount and umount is fallible; the image must be
    // unmounted either way or staging cleanup cannot remove it.
    let populate = (|| -> Result<()> {
        fsops::mkdir_p(&efi_mount.join("EFI/BOOT"))?;
        fsops::copy_file(&config.grub_efi, &efi_mount.join("EFI/BOOT/BOOTX64.EFI"))
    })();

    let umount = Cmd::new("umount").arg_path(&efi_mount).allow_fail().run();
    if !matches!(&umount, Ok(r) if r.success()) {
        eprintln!(
            "[WARN] Failed to unmount EFI image at {}",
            efi_mount.display()
        );
    }
    populate?;

    fsops::remove_all(&efi_mount)?;
    Ok(())
}
