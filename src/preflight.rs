//! Preflight checks for the build host.
//!
//! Validates required tools and asset files before any side effect, so a
//! missing dependency surfaces as one readable report instead of a cryptic
//! failure an hour into debootstrap.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::Config;

/// Required host commands, with the Debian package that provides each.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("debootstrap", "debootstrap"),
    ("chroot", "coreutils"),
    ("mount", "mount"),
    ("tar", "tar"),
    ("cp", "coreutils"),
    ("mksquashfs", "squashfs-tools"),
    ("xorriso", "xorriso"),
    ("mkfs.fat", "dosfstools"),
    ("dd", "coreutils"),
];

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub details: Option<String>,
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub missing_commands: Vec<CheckResult>,
    pub missing_files: Vec<CheckResult>,
    pub passed: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.missing_commands.is_empty() && self.missing_files.is_empty()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");
        for check in &self.passed {
            match &check.details {
                Some(d) => println!("  [PASS] {}: {}", check.name, d),
                None => println!("  [PASS] {}", check.name),
            }
        }
        for check in self.missing_commands.iter().chain(&self.missing_files) {
            match &check.details {
                Some(d) => println!("  [FAIL] {}: {}", check.name, d),
                None => println!("  [FAIL] {}", check.name),
            }
        }
        println!();
        if self.all_passed() {
            println!("All checks passed.");
        } else {
            println!(
                "{} check(s) failed.",
                self.missing_commands.len() + self.missing_files.len()
            );
        }
    }
}

/// Run all host checks for a build with this configuration.
pub fn check_host(config: &Config) -> PreflightReport {
    let mut report = PreflightReport {
        missing_commands: vec![],
        missing_files: vec![],
        passed: vec![],
    };

    for (tool, package) in REQUIRED_TOOLS {
        match which::which(tool) {
            Ok(path) => report.passed.push(CheckResult {
                name: tool.to_string(),
                passed: true,
                details: Some(path.display().to_string()),
            }),
            Err(_) => report.missing_commands.push(CheckResult {
                name: tool.to_string(),
                passed: false,
                details: Some(format!("not in PATH (install: {})", package)),
            }),
        }
    }

    let required_files: &[(&str, PathBuf)] = &[
        ("splash logo", config.splash_logo.clone()),
        ("isolinux.bin", config.isolinux_bin.clone()),
        ("ldlinux.c32", config.ldlinux_c32.clone()),
        ("GRUB EFI binary", config.grub_efi.clone()),
        ("isohybrid MBR template", config.isohdpfx_bin.clone()),
    ];
    for (name, path) in required_files {
        if path.exists() {
            report.passed.push(CheckResult {
                name: name.to_string(),
                passed: true,
                details: Some(path.display().to_string()),
            });
        } else {
            report.missing_files.push(CheckResult {
                name: name.to_string(),
                passed: false,
                details: Some(format!("file not found: {}", path.display())),
            });
        }
    }

    report
}

/// Bail with a report distinguishing missing files from missing commands.
pub fn ensure_ready(config: &Config) -> Result<()> {
    let report = check_host(config);
    if report.all_passed() {
        return Ok(());
    }

    let mut message = String::from("Host is not ready to build:\n");
    if !report.missing_commands.is_empty() {
        message.push_str("\nMissing commands:\n");
        for check in &report.missing_commands {
            message.push_str(&format!(
                "  {} ({})\n",
                check.name,
                check.details.as_deref().unwrap_or("")
            ));
        }
    }
    if !report.missing_files.is_empty() {
        message.push_str("\nMissing files:\n");
        for check in &report.missing_files {
            message.push_str(&format!(
                "  {} ({})\n",
                check.name,
                check.details.as_deref().unwrap_or("")
            ));
        }
    }
    bail!(message.trim_end().to_string());
}
