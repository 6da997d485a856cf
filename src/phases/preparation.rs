//! Phase 1: Preparation.
//!
//! Resolves the requested version to concrete per-component release
//! versions and downloads the component binaries into the components
//! directory. Nothing has been built yet, so a terminal failure here has
//! nothing to roll back.

use anyhow::{anyhow, Result};

use super::{step, Phase};
use crate::components::{self, Component};
use crate::config::Config;
use crate::fsops;
use crate::resolve::{ResolveError, Resolver};

pub fn run(config: &Config, resolver: &dyn Resolver, tag: &str) -> Result<()> {
    println!("=== Phase 1: Preparation ===");

    let components_dir = config.components_dir();
    step(Phase::Preparation, "create components directory", || {
        fsops::mkdir_p(&components_dir)
    })?;

    step(Phase::Preparation, "fetch components", || {
        for component in components::MANIFEST {
            fetch_component(resolver, component, tag, config)?;
        }
        Ok(())
    })?;

    println!("Phase 1 complete: Components fetched\n");
    Ok(())
}

fn fetch_component(
    resolver: &dyn Resolver,
    component: &Component,
    tag: &str,
    config: &Config,
) -> Result<()> {
    let resolved = match resolver.resolve(component.repo, tag) {
        Ok(resolved) => resolved,
        Err(ResolveError::NoMatch { .. }) if !component.required => {
            println!(
                "  [SKIP] No release of optional component {}",
                component.repo
            );
            return Ok(());
        }
        Err(e) => {
            return Err(anyhow!(e)
                .context(format!("Failed to resolve component {}", component.repo)))
        }
    };

    println!("  Fetching {} {}...", component.repo, resolved);
    let dest = config.components_dir().join(component.binary);
    resolver
        .fetch(component.repo, &resolved, &dest)
        .map_err(|e| anyhow!(e).context(format!("Failed to fetch {}", component.repo)))?;

    Ok(())
}
