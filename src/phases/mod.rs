//! The build pipeline: five phases in fixed dependency order.
//!
//! ```text
//! Preparation -> Base -> Payload -> Carrier -> Assembly
//! ```
//!
//! Each phase is gated on the previous one succeeding; the only branching
//! is the cache-hit/miss fork inside Base/Payload/Carrier. There are no
//! orchestrator-level retries. Failures carry the phase and step that
//! failed ([`PhaseStep`]), which is usually the only signal distinguishing
//! "directory creation failed" from "package install failed" in a
//! post-mortem.

pub mod assembly;
pub mod base;
pub mod carrier;
pub mod payload;
pub mod preparation;

use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::ArtifactCache;
use crate::config::{self, Config};
use crate::fsops;
use crate::preflight;
use crate::resolve::Resolver;
use crate::version;

/// The pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preparation,
    Base,
    Payload,
    Carrier,
    Assembly,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Preparation => "Preparation",
            Phase::Base => "Base",
            Phase::Payload => "Payload",
            Phase::Carrier => "Carrier",
            Phase::Assembly => "Assembly",
        };
        f.write_str(name)
    }
}

/// Tag attached to a failure identifying the phase and step it came from.
///
/// Attached as `anyhow` context, so the underlying cause stays in the
/// chain and callers can `downcast_ref::<PhaseStep>()` to recover the
/// identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseStep {
    pub phase: Phase,
    pub step: &'static str,
}

impl fmt::Display for PhaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed at step '{}'", self.phase, self.step)
    }
}

/// Run `f` as a named step of `phase`, tagging any failure.
pub(crate) fn step<T>(
    phase: Phase,
    step: &'static str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    f().with_context(|| PhaseStep { phase, step })
}

/// Attempts for best-effort staging/scratch removal.
const CLEANUP_MAX_RETRIES: u32 = 3;

/// Delay between cleanup retries; files can be transiently locked by
/// just-unmounted loop devices.
const CLEANUP_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Remove a directory tree with bounded retries, warning on final failure.
///
/// Cleanup must never fail a build that otherwise succeeded; on persistent
/// failure the directory is left behind for manual inspection.
pub(crate) fn cleanup_with_retries(path: &std::path::Path) -> bool {
    for attempt in 1..=CLEANUP_MAX_RETRIES {
        if fsops::remove_all(path).is_ok() {
            return true;
        }
        if attempt < CLEANUP_MAX_RETRIES {
            eprintln!("[WARN] Cleanup attempt {} failed, retrying...", attempt);
            std::thread::sleep(CLEANUP_RETRY_DELAY);
        }
    }
    eprintln!(
        "[WARN] Failed to clean up {} after {} attempts",
        path.display(),
        CLEANUP_MAX_RETRIES
    );
    false
}

/// Open the artifact cache, degrading to uncached operation on failure.
fn open_cache(config: &Config) -> Option<ArtifactCache> {
    let root = config.cache_dir.as_deref()?;
    match ArtifactCache::open(root) {
        Ok(cache) => Some(cache),
        Err(e) => {
            eprintln!("[WARN] Caching disabled: {:#}", e);
            None
        }
    }
}

/// Run the full pipeline for a version tag. Returns the final ISO path.
///
/// Validation and preflight run before any side effect; an invalid version
/// or missing host dependency leaves the filesystem untouched. The scratch
/// tree is torn down on success and failure alike, and survives only when
/// its removal itself keeps failing.
pub fn run_build(config: &Config, resolver: &dyn Resolver, tag: &str) -> Result<PathBuf> {
    version::validate(tag)?;
    preflight::ensure_ready(config)?;

    let v = version::strip_prefix(tag).to_string();
    println!("=== Building {} {} ===\n", config::OS_NAME, v);

    let result = run_phases(config, resolver, tag, &v);
    cleanup_with_retries(&config.scratch_dir);

    let iso_path = result?;
    println!("\n=== Build complete ===");
    println!("  ISO: {}", iso_path.display());
    Ok(iso_path)
}

fn run_phases(
    config: &Config,
    resolver: &dyn Resolver,
    tag: &str,
    v: &str,
) -> Result<PathBuf> {
    step(Phase::Preparation, "clean scratch directory", || {
        fsops::remove_all(&config.scratch_dir)
    })?;
    step(Phase::Preparation, "create scratch directory", || {
        fsops::mkdir_p(&config.scratch_dir)
    })?;

    let cache = open_cache(config);

    preparation::run(config, resolver, tag)?;
    base::run(config, cache.as_ref())?;
    payload::run(config, cache.as_ref(), v)?;
    carrier::run(config, cache.as_ref(), v)?;
    assembly::run(config, v)
}
