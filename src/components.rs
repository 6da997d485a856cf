//! Component manifest and binary installation.
//!
//! LimeOS ships a handful of first-party binaries (the installer wizard,
//! the window manager, ...) released independently of the base system. The
//! manifest is plain data handed to the fetch and install steps; required
//! components fail the build when missing, optional ones warn and skip.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config;
use crate::fsops;

/// One installable component binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    /// Repository (and release asset) name.
    pub repo: &'static str,
    /// Binary name installed into the rootfs.
    pub binary: &'static str,
    /// Required components abort the build when missing.
    pub required: bool,
}

/// The ordered component manifest for a LimeOS build.
pub const MANIFEST: &[Component] = &[
    Component {
        repo: "installation-wizard",
        binary: config::INSTALLER_BINARY_NAME,
        required: true,
    },
    Component {
        repo: "window-manager",
        binary: "limeos-wm",
        required: true,
    },
    Component {
        repo: "welcome-tour",
        binary: "welcome-tour",
        required: false,
    },
];

/// Install component binaries from `components_dir` into `rootfs`.
///
/// Binaries are copied to `usr/local/bin` and marked executable.
pub fn install_components(
    rootfs: &Path,
    components_dir: &Path,
    manifest: &[Component],
) -> Result<()> {
    println!("Installing components into rootfs...");

    let bin_dir = rootfs.join(config::INSTALL_BIN_PATH);
    fsops::mkdir_p(&bin_dir)?;

    for component in manifest {
        let src = components_dir.join(component.binary);
        let dst = bin_dir.join(component.binary);

        if !src.exists() {
            if component.required {
                bail!("Required component missing: {}", component.binary);
            }
            println!("  [SKIP] Optional component not present: {}", component.binary);
            continue;
        }

        fsops::copy_file(&src, &dst)
            .with_context(|| format!("Failed to install component {}", component.binary))?;
        fsops::chmod("+x", &dst)?;
        println!("  Installed {}", component.binary);
    }

    Ok(())
}
