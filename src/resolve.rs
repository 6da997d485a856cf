//! Component release resolution against the GitHub releases API.
//!
//! A build version like `1.2.3` names a LimeOS release line, not the exact
//! version of every component; each component ships its own releases. The
//! resolver picks, per component, the newest release sharing the requested
//! major version, and downloads its binary asset.

use semver::Version;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::config;
use crate::version;

/// Failures of the release-resolution collaborator.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid version format: {0}")]
    InvalidVersion(String),

    #[error("releases API request failed for {component}: {reason}")]
    Network { component: String, reason: String },

    #[error("failed to parse releases API response for {component}: {reason}")]
    Parse { component: String, reason: String },

    #[error("no release of {component} matches major version of {requested}")]
    NoMatch {
        component: String,
        requested: String,
    },
}

/// Resolves component versions and fetches their binaries.
///
/// The orchestrator only sees this trait; tests substitute a stub so the
/// pipeline runs without network access.
pub trait Resolver {
    /// Resolve `requested` to a concrete release tag for `component`.
    fn resolve(&self, component: &str, requested: &str) -> Result<String, ResolveError>;

    /// Download the binary of `component` at `tag` to `dest`.
    fn fetch(&self, component: &str, tag: &str, dest: &Path) -> Result<(), ResolveError>;
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    name: String,
    browser_download_url: String,
}

/// Resolver backed by the GitHub releases API.
pub struct GithubResolver {
    api_base: String,
    org: String,
    agent: ureq::Agent,
}

impl GithubResolver {
    pub fn new() -> Self {
        Self::with_api_base("https://api.github.com")
    }

    pub fn with_api_base(api_base: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            org: config::GITHUB_ORG.to_string(),
            agent: ureq::AgentBuilder::new()
                .user_agent("limeiso/1.0")
                .timeout(std::time::Duration::from_secs(30))
                .build(),
        }
    }

    fn releases(&self, component: &str) -> Result<Vec<Release>, ResolveError> {
        let url = format!(
            "{}/repos/{}/{}/releases",
            self.api_base, self.org, component
        );
        let response = self.agent.get(&url).call().map_err(|e| ResolveError::Network {
            component: component.to_string(),
            reason: e.to_string(),
        })?;
        response
            .into_json::<Vec<Release>>()
            .map_err(|e| ResolveError::Parse {
                component: component.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for GithubResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for GithubResolver {
    fn resolve(&self, component: &str, requested: &str) -> Result<String, ResolveError> {
        let releases = self.releases(component)?;
        select_release(component, requested, &releases)
    }

    fn fetch(&self, component: &str, tag: &str, dest: &Path) -> Result<(), ResolveError> {
        let releases = self.releases(component)?;
        let release = releases
            .iter()
            .find(|r| r.tag_name == tag)
            .ok_or_else(|| ResolveError::NoMatch {
                component: component.to_string(),
                requested: tag.to_string(),
            })?;

        // Release assets are named after the component binary.
        let asset = release
            .assets
            .iter()
            .find(|a| a.name == component)
            .ok_or_else(|| ResolveError::NoMatch {
                component: component.to_string(),
                requested: tag.to_string(),
            })?;

        let response = self
            .agent
            .get(&asset.browser_download_url)
            .call()
            .map_err(|e| ResolveError::Network {
                component: component.to_string(),
                reason: e.to_string(),
            })?;

        let mut file = std::fs::File::create(dest).map_err(|e| ResolveError::Network {
            component: component.to_string(),
            reason: format!("cannot create {}: {}", dest.display(), e),
        })?;
        std::io::copy(&mut response.into_reader().take(512 * 1024 * 1024), &mut file)
            .map_err(|e| ResolveError::Network {
                component: component.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Pick the newest release tag sharing the requested major version.
fn select_release(
    component: &str,
    requested: &str,
    releases: &[Release],
) -> Result<String, ResolveError> {
    let wanted = version::parse(requested)
        .map_err(|_| ResolveError::InvalidVersion(requested.to_string()))?;

    let mut best: Option<(Version, &str)> = None;
    for release in releases {
        // Tags that are not semver (e.g. "nightly") are simply skipped.
        let Ok(v) = version::parse(&release.tag_name) else {
            continue;
        };
        if v.major != wanted.major {
            continue;
        }
        if best.as_ref().is_none_or(|(b, _)| v > *b) {
            best = Some((v, &release.tag_name));
        }
    }

    match best {
        Some((_, tag)) => Ok(tag.to_string()),
        None => Err(ResolveError::NoMatch {
            component: component.to_string(),
            requested: requested.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str) -> Release {
        Release {
            tag_name: tag.to_string(),
            assets: vec![],
        }
    }

    #[test]
    fn test_select_picks_newest_same_major() {
        let releases = vec![
            release("v1.0.0"),
            release("v1.4.2"),
            release("v2.0.0"),
            release("v1.2.9"),
        ];
        let tag = select_release("wm", "1.0.0", &releases).unwrap();
        assert_eq!(tag, "v1.4.2");
    }

    #[test]
    fn test_select_skips_non_semver_tags() {
        let releases = vec![release("nightly"), release("v1.1.0")];
        let tag = select_release("wm", "v1.0.0", &releases).unwrap();
        assert_eq!(tag, "v1.1.0");
    }

    #[test]
    fn test_select_no_match_is_distinct_error() {
        let releases = vec![release("v2.0.0")];
        let err = select_release("wm", "1.0.0", &releases).unwrap_err();
        assert!(matches!(err, ResolveError::NoMatch { .. }));
    }

    #[test]
    fn test_select_invalid_requested_version() {
        let err = select_release("wm", "not-a-version", &[]).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidVersion(_)));
    }

    #[test]
    fn test_release_json_shape() {
        let json = r#"[
            {"tag_name": "v1.2.3", "assets": [
                {"name": "installation-wizard",
                 "browser_download_url": "https://example.invalid/iw"}
            ]},
            {"tag_name": "v1.0.0"}
        ]"#;
        let releases: Vec<Release> = serde_json::from_str(json).unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].assets[0].name, "installation-wizard");
        assert!(releases[1].assets.is_empty());
    }
}
