//! LimeOS branding applied to rootfs snapshots.
//!
//! Everything here is version- or identity-specific and therefore runs on
//! every build, after any cache restore: identity files, APT sources,
//! Plymouth splash, GRUB defaults, service enablement, and the default
//! user for the installed system.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config;
use crate::fsops;
use crate::process;
use crate::version;

/// Write OS identity files into a rootfs.
///
/// The `v` tag prefix never reaches the branded system: `v1.2.3` brands as
/// `VERSION_ID="1.2.3"`.
pub fn write_os_identity(rootfs: &Path, tag: &str) -> Result<()> {
    println!("Writing OS identity files...");
    let v = version::strip_prefix(tag);

    let os_release = format!(
        "PRETTY_NAME=\"{name} {v}\"\n\
         NAME=\"{name}\"\n\
         VERSION_ID=\"{v}\"\n\
         VERSION=\"{v}\"\n\
         ID={id}\n\
         ID_LIKE={id_like}\n\
         HOME_URL=\"{url}\"\n",
        name = config::OS_NAME,
        id = config::OS_ID,
        id_like = config::OS_BASE_ID,
        url = config::OS_HOME_URL,
    );
    fsops::write_file(&rootfs.join("etc/os-release"), &os_release)
        .context("Failed to write /etc/os-release")?;

    fsops::write_file(
        &rootfs.join("etc/issue"),
        &format!("{} {} \\n \\l\n\n", config::OS_NAME, v),
    )
    .context("Failed to write /etc/issue")?;

    fsops::write_file(
        &rootfs.join("etc/issue.net"),
        &format!("{} {}\n", config::OS_NAME, v),
    )
    .context("Failed to write /etc/issue.net")?;

    // Empty machine-id means "uninitialized"; systemd generates a unique
    // one on first boot instead of every image sharing the build host's.
    fsops::write_file(&rootfs.join("etc/machine-id"), "")
        .context("Failed to clear /etc/machine-id")?;

    Ok(())
}

/// Write the full APT source list for the installed system.
pub fn write_apt_sources(rootfs: &Path) -> Result<()> {
    println!("Configuring APT sources...");
    let release = config::DEBIAN_RELEASE;
    let sources = format!(
        "deb http://deb.debian.org/debian {release} main contrib non-free non-free-firmware\n\
         deb http://deb.debian.org/debian {release}-updates main contrib non-free non-free-firmware\n\
         deb http://security.debian.org/debian-security {release}-security main contrib non-free non-free-firmware\n",
    );
    fsops::write_file(&rootfs.join("etc/apt/sources.list"), &sources)
        .context("Failed to write /etc/apt/sources.list")
}

/// Install the Plymouth splash theme with the LimeOS logo.
pub fn configure_splash(rootfs: &Path, logo: &Path) -> Result<()> {
    println!("Configuring Plymouth splash screen...");

    if !logo.exists() {
        bail!("Splash logo not found: {}", logo.display());
    }

    let theme = config::OS_ID;
    let themes_dir = format!("usr/share/plymouth/themes/{}", theme);
    let theme_dir = rootfs.join(&themes_dir);
    fsops::mkdir_p(&theme_dir)?;

    fsops::copy_file(logo, &theme_dir.join("splash.png"))
        .context("Failed to copy splash logo")?;

    let theme_cfg = format!(
        "[Plymouth Theme]\n\
         Name={name}\n\
         Description={name} boot splash\n\
         ModuleName=script\n\
         \n\
         [script]\n\
         ImageDir=/{dir}\n\
         ScriptFile=/{dir}/{theme}.script\n",
        name = config::OS_NAME,
        dir = themes_dir,
    );
    fsops::write_file(&theme_dir.join(format!("{}.plymouth", theme)), &theme_cfg)
        .context("Failed to write Plymouth theme config")?;

    // Centered logo on a black background; progress is intentionally bare.
    let script = "logo.image = Image(\"splash.png\");\n\
         logo.sprite = Sprite(logo.image);\n\
         logo.sprite.SetX(Window.GetWidth() / 2 - logo.image.GetWidth() / 2);\n\
         logo.sprite.SetY(Window.GetHeight() / 2 - logo.image.GetHeight() / 2);\n";
    fsops::write_file(&theme_dir.join(format!("{}.script", theme)), script)
        .context("Failed to write Plymouth theme script")?;

    // Select the theme directly; avoids running plymouth-set-default-theme
    // in the chroot.
    fsops::write_file(
        &rootfs.join("etc/plymouth/plymouthd.conf"),
        &format!("[Daemon]\nTheme={}\n", theme),
    )
    .context("Failed to write plymouthd.conf")?;

    Ok(())
}

/// Write the GRUB drop-in for a silent installed-system boot.
///
/// Uses /etc/default/grub.d so the package-managed /etc/default/grub file
/// is never replaced.
pub fn configure_grub_defaults(rootfs: &Path) -> Result<()> {
    println!("Configuring GRUB for silent boot...");

    let content = format!(
        "GRUB_DISTRIBUTOR=\"{}\"\n\
         GRUB_TIMEOUT=0\n\
         GRUB_TIMEOUT_STYLE=hidden\n\
         GRUB_RECORDFAIL_TIMEOUT=0\n\
         GRUB_GFXMODE=auto\n\
         GRUB_GFXPAYLOAD_LINUX=keep\n\
         GRUB_CMDLINE_LINUX_DEFAULT=\"{}\"\n",
        config::OS_NAME,
        config::TARGET_KERNEL_PARAMS,
    );
    fsops::write_file(
        &rootfs.join("etc/default/grub.d/distributor.cfg"),
        &content,
    )
    .context("Failed to write GRUB drop-in")
}

/// Enable NetworkManager inside the rootfs.
pub fn enable_networking(rootfs: &Path) -> Result<()> {
    println!("Enabling essential services...");
    process::run_in_chroot(rootfs, "systemctl enable NetworkManager")
        .context("Failed to enable NetworkManager")?;
    Ok(())
}

/// Create the default user for the installed system.
///
/// The account starts without a password; the installer sets one during
/// installation.
pub fn create_default_user(rootfs: &Path) -> Result<()> {
    println!("Creating default user '{}'...", config::DEFAULT_USER);
    let script = format!(
        "useradd --create-home --shell /bin/bash --groups sudo {}",
        config::DEFAULT_USER
    );
    process::run_in_chroot(rootfs, &script).context("Failed to create default user")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_identity_strips_v_prefix() {
        let temp = TempDir::new().unwrap();
        write_os_identity(temp.path(), "v1.2.3").unwrap();

        let os_release = fs::read_to_string(temp.path().join("etc/os-release")).unwrap();
        assert!(os_release.contains("VERSION_ID=\"1.2.3\""));
        assert!(!os_release.contains("v1.2.3"));
        assert!(os_release.contains("ID=limeos"));
        assert!(os_release.contains("ID_LIKE=debian"));
    }

    #[test]
    fn test_identity_writes_issue_files() {
        let temp = TempDir::new().unwrap();
        write_os_identity(temp.path(), "2.0.0").unwrap();

        let issue = fs::read_to_string(temp.path().join("etc/issue")).unwrap();
        assert!(issue.contains("LimeOS 2.0.0"));
        let issue_net = fs::read_to_string(temp.path().join("etc/issue.net")).unwrap();
        assert_eq!(issue_net, "LimeOS 2.0.0\n");
    }

    #[test]
    fn test_identity_clears_machine_id() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("etc")).unwrap();
        fs::write(temp.path().join("etc/machine-id"), "stale-build-host-id\n").unwrap();

        write_os_identity(temp.path(), "1.0.0").unwrap();
        let machine_id = fs::read_to_string(temp.path().join("etc/machine-id")).unwrap();
        assert!(machine_id.is_empty());
    }

    #[test]
    fn test_apt_sources_cover_security_and_updates() {
        let temp = TempDir::new().unwrap();
        write_apt_sources(temp.path()).unwrap();

        let sources = fs::read_to_string(temp.path().join("etc/apt/sources.list")).unwrap();
        assert!(sources.contains("bookworm main"));
        assert!(sources.contains("bookworm-updates"));
        assert!(sources.contains("bookworm-security"));
        assert!(sources.contains("non-free-firmware"));
    }

    #[test]
    fn test_splash_requires_logo() {
        let temp = TempDir::new().unwrap();
        let err =
            configure_splash(temp.path(), &temp.path().join("missing.png")).unwrap_err();
        assert!(err.to_string().contains("Splash logo not found"));
    }

    #[test]
    fn test_splash_installs_theme() {
        let temp = TempDir::new().unwrap();
        let logo = temp.path().join("logo.png");
        fs::write(&logo, "png-bytes").unwrap();

        let rootfs = temp.path().join("rootfs");
        configure_splash(&rootfs, &logo).unwrap();

        let theme_dir = rootfs.join("usr/share/plymouth/themes/limeos");
        assert!(theme_dir.join("splash.png").exists());
        let cfg = fs::read_to_string(theme_dir.join("limeos.plymouth")).unwrap();
        assert!(cfg.contains("ModuleName=script"));
        assert!(theme_dir.join("limeos.script").exists());
        let daemon = fs::read_to_string(rootfs.join("etc/plymouth/plymouthd.conf")).unwrap();
        assert!(daemon.contains("Theme=limeos"));
    }

    #[test]
    fn test_grub_dropin_contents() {
        let temp = TempDir::new().unwrap();
        configure_grub_defaults(temp.path()).unwrap();

        let cfg =
            fs::read_to_string(temp.path().join("etc/default/grub.d/distributor.cfg")).unwrap();
        assert!(cfg.contains("GRUB_DISTRIBUTOR=\"LimeOS\""));
        assert!(cfg.contains("GRUB_TIMEOUT=0"));
        assert!(cfg.contains("GRUB_TIMEOUT_STYLE=hidden"));
    }
}
