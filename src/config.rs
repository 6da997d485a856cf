//! Configuration for the LimeOS ISO builder.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over .env. All of this is
//! operator plumbing; the distribution constants live at the bottom.

use std::path::{Path, PathBuf};

/// The OS name used in branding and boot menus.
pub const OS_NAME: &str = "LimeOS";

/// Machine-readable OS ID for /etc/os-release.
pub const OS_ID: &str = "limeos";

/// The upstream distribution this OS derives from.
pub const OS_BASE_ID: &str = "debian";

/// Project home page for /etc/os-release.
pub const OS_HOME_URL: &str = "https://limeos.org";

/// The Debian release the base rootfs is bootstrapped from.
pub const DEBIAN_RELEASE: &str = "bookworm";

/// GitHub organization hosting the component repositories.
pub const GITHUB_ORG: &str = "limeos-org";

/// Install path for component binaries, relative to a rootfs.
pub const INSTALL_BIN_PATH: &str = "usr/local/bin";

/// Name of the installer autostart service and its binary.
pub const INSTALLER_SERVICE_NAME: &str = "limeos-installer";
pub const INSTALLER_BINARY_NAME: &str = "installation-wizard";

/// Login name of the default user created on the installed system.
pub const DEFAULT_USER: &str = "lime";

/// Kernel command line for the live installer environment.
pub const LIVE_KERNEL_PARAMS: &str = "boot=live quiet splash loglevel=0";

/// Kernel command line default for the installed system's GRUB.
pub const TARGET_KERNEL_PARAMS: &str = "quiet splash loglevel=0";

/// Packages installed into the payload (target) rootfs.
pub const TARGET_PACKAGES: &str = "linux-image-amd64 systemd-sysv network-manager sudo \
     plymouth plymouth-themes xserver-xorg xinit xdm openbox \
     firmware-linux-free";

/// Packages installed into the carrier (live) rootfs.
pub const LIVE_PACKAGES: &str = "linux-image-amd64 live-boot systemd-sysv network-manager \
     plymouth plymouth-themes";

/// Bootloader packages bundled for the installer to use offline.
pub const BIOS_PACKAGES: &str = "grub-pc grub-pc-bin grub2-common";
pub const EFI_PACKAGES: &str = "grub-efi-amd64 grub-efi-amd64-bin efibootmgr";

/// Where bundled bootloader packages land inside the carrier rootfs.
pub const PACKAGES_BIOS_DIR: &str = "usr/share/limeos/packages/bios";
pub const PACKAGES_EFI_DIR: &str = "usr/share/limeos/packages/efi";

/// Where the payload tarball is embedded inside the carrier rootfs.
pub const EMBEDDED_PAYLOAD_PATH: &str = "usr/share/limeos/target-rootfs.tar.gz";

/// Builder configuration resolved from environment and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ephemeral build scratch root (rootfs dirs, staging, components).
    pub scratch_dir: PathBuf,
    /// Directory the final ISO is written to.
    pub output_dir: PathBuf,
    /// Cache root; `None` disables caching entirely.
    pub cache_dir: Option<PathBuf>,
    /// Splash logo copied into the Plymouth theme.
    pub splash_logo: PathBuf,
    /// Host path of isolinux.bin (BIOS boot).
    pub isolinux_bin: PathBuf,
    /// Host path of ldlinux.c32 (BIOS boot).
    pub ldlinux_c32: PathBuf,
    /// Host path of the monolithic GRUB EFI binary (UEFI boot).
    pub grub_efi: PathBuf,
    /// Host path of the isohybrid MBR template.
    pub isohdpfx_bin: PathBuf,
}

impl Config {
    /// Load configuration from .env and environment variables.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let scratch_dir = std::env::var("LIMEISO_BUILD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/tmp/limeiso"));

        let output_dir = std::env::var("LIMEISO_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let cache_dir = if std::env::var("LIMEISO_NO_CACHE").is_ok() {
            None
        } else {
            Some(
                std::env::var("LIMEISO_CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        dirs::cache_dir()
                            .unwrap_or_else(|| PathBuf::from("/var/cache"))
                            .join("limeiso")
                    }),
            )
        };

        let splash_logo = std::env::var("LIMEISO_SPLASH_LOGO")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/share/limeos/splash.png"));

        let isolinux_bin = std::env::var("LIMEISO_ISOLINUX_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/lib/ISOLINUX/isolinux.bin"));

        let ldlinux_c32 = std::env::var("LIMEISO_LDLINUX_C32")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                PathBuf::from("/usr/lib/syslinux/modules/bios/ldlinux.c32")
            });

        let grub_efi = std::env::var("LIMEISO_GRUB_EFI")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                PathBuf::from("/usr/lib/grub/x86_64-efi/monolithic/grubx64.efi")
            });

        let isohdpfx_bin = std::env::var("LIMEISO_ISOHDPFX_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/lib/ISOLINUX/isohdpfx.bin"));

        Self {
            scratch_dir,
            output_dir,
            cache_dir,
            splash_logo,
            isolinux_bin,
            ldlinux_c32,
            grub_efi,
            isohdpfx_bin,
        }
    }

    /// Downloaded component binaries.
    pub fn components_dir(&self) -> PathBuf {
        self.scratch_dir.join("components")
    }

    /// The shared base rootfs both payload and carrier derive from.
    pub fn base_rootfs_dir(&self) -> PathBuf {
        self.scratch_dir.join("base-rootfs")
    }

    /// The target filesystem that will be installed to disk.
    pub fn payload_rootfs_dir(&self) -> PathBuf {
        self.scratch_dir.join("payload-rootfs")
    }

    /// The live filesystem that boots from the installer medium.
    pub fn carrier_rootfs_dir(&self) -> PathBuf {
        self.scratch_dir.join("carrier-rootfs")
    }

    /// The packaged payload tarball embedded into the carrier.
    pub fn payload_tarball(&self) -> PathBuf {
        self.scratch_dir.join("payload.tar.gz")
    }

    /// ISO assembly staging tree.
    pub fn staging_dir(&self) -> PathBuf {
        self.scratch_dir.join("staging-iso")
    }

    /// Final ISO path for a (prefix-stripped) version.
    pub fn iso_path(&self, version: &str) -> PathBuf {
        self.output_dir.join(format!("limeos-{}.iso", version))
    }
}

/// Path helper: join a rootfs-relative constant onto a rootfs path.
pub fn rootfs_path(rootfs: &Path, relative: &str) -> PathBuf {
    rootfs.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_path_embeds_version() {
        let config = Config {
            scratch_dir: PathBuf::from("/tmp/scratch"),
            output_dir: PathBuf::from("/tmp/out"),
            cache_dir: None,
            splash_logo: PathBuf::from("/tmp/logo.png"),
            isolinux_bin: PathBuf::from("/usr/lib/ISOLINUX/isolinux.bin"),
            ldlinux_c32: PathBuf::from("/usr/lib/syslinux/modules/bios/ldlinux.c32"),
            grub_efi: PathBuf::from("/usr/lib/grub/x86_64-efi/monolithic/grubx64.efi"),
            isohdpfx_bin: PathBuf::from("/usr/lib/ISOLINUX/isohdpfx.bin"),
        };
        assert_eq!(
            config.iso_path("1.2.3"),
            PathBuf::from("/tmp/out/limeos-1.2.3.iso")
        );
    }

    #[test]
    fn test_scratch_subdirectories() {
        let config = Config {
            scratch_dir: PathBuf::from("/work"),
            output_dir: PathBuf::from("."),
            cache_dir: None,
            splash_logo: PathBuf::from("/logo.png"),
            isolinux_bin: PathBuf::from("/usr/lib/ISOLINUX/isolinux.bin"),
            ldlinux_c32: PathBuf::from("/usr/lib/syslinux/modules/bios/ldlinux.c32"),
            grub_efi: PathBuf::from("/usr/lib/grub/x86_64-efi/monolithic/grubx64.efi"),
            isohdpfx_bin: PathBuf::from("/usr/lib/ISOLINUX/isohdpfx.bin"),
        };
        assert_eq!(config.components_dir(), PathBuf::from("/work/components"));
        assert_eq!(config.base_rootfs_dir(), PathBuf::from("/work/base-rootfs"));
        assert_eq!(
            config.payload_rootfs_dir(),
            PathBuf::from("/work/payload-rootfs")
        );
        assert_eq!(
            config.carrier_rootfs_dir(),
            PathBuf::from("/work/carrier-rootfs")
        );
        assert_eq!(config.payload_tarball(), PathBuf::from("/work/payload.tar.gz"));
        assert_eq!(config.staging_dir(), PathBuf::from("/work/staging-iso"));
    }

    #[test]
    fn test_rootfs_path_join() {
        assert_eq!(
            rootfs_path(Path::new("/r"), INSTALL_BIN_PATH),
            PathBuf::from("/r/usr/local/bin")
        );
    }
}
