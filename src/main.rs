//! limeiso - LimeOS installer ISO builder.
//!
//! One-shot batch CLI: `limeiso build <version>` produces a bootable
//! installer ISO. Must run as root; it performs bootstrap, chroot, and
//! mount operations.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use limeiso::config::Config;
use limeiso::phases::{self, PhaseStep};
use limeiso::preflight;
use limeiso::resolve::GithubResolver;
use limeiso::{fsops, version};

#[derive(Parser)]
#[command(name = "limeiso")]
#[command(about = "LimeOS installer ISO builder")]
#[command(
    after_help = "QUICK START:\n  limeiso preflight      Check host dependencies\n  sudo limeiso build 1.0.0   Build the installer ISO"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the installer ISO for a version tag (e.g. 1.0.0 or v1.0.0)
    Build {
        /// Version tag to build
        version: String,

        /// Disable the artifact cache for this build
        #[arg(long)]
        no_cache: bool,

        /// Directory to write the ISO to (default: current directory)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check host dependencies without building
    Preflight,

    /// Remove the build scratch directory
    Clean,
}

fn running_as_root() -> bool {
    // Safety: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Build {
            version: tag,
            no_cache,
            output,
        } => {
            // Reject bad input before the privilege check so usage errors
            // don't ask for sudo first.
            version::validate(&tag)?;

            if !running_as_root() {
                bail!("This program must be run as root");
            }

            let mut config = config;
            if no_cache {
                config.cache_dir = None;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }

            let resolver = GithubResolver::new();
            match phases::run_build(&config, &resolver, &tag) {
                Ok(_iso_path) => Ok(()),
                Err(e) => {
                    // The PhaseStep tag names the failing phase and step;
                    // keep it first so operators see it before the cause.
                    if let Some(tag) = e.downcast_ref::<PhaseStep>() {
                        eprintln!("[ERROR] {}", tag);
                    }
                    Err(e)
                }
            }
        }

        Commands::Preflight => {
            let report = preflight::check_host(&config);
            report.print();
            if report.all_passed() {
                Ok(())
            } else {
                bail!("preflight checks failed");
            }
        }

        Commands::Clean => {
            if config.scratch_dir.exists() {
                println!("Removing {}...", config.scratch_dir.display());
                fsops::remove_all(&config.scratch_dir)?;
            }
            println!("Clean complete.");
            Ok(())
        }
    }
}
