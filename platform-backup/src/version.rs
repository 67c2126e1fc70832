//! Version stamping and the restore compatibility gate.

use crate::archive::layout;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::future::Future;
use std::path::Path;
use tracing::{debug, info};

/// Platform version recorded in every archive as `version.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    pub version: String,
    pub build: String,
}

impl VersionManifest {
    pub fn new(version: impl Into<String>, build: impl Into<String>) -> Self {
        Self { version: version.into(), build: build.into() }
    }

    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(layout::VERSION_FILE);
        fs::write(&path, serde_json::to_vec(self)?)?;
        debug!(path = %path.display(), version = %self.version, "Wrote version manifest");
        Ok(())
    }

    pub fn read_from(dir: &Path) -> Result<Self> {
        let path = dir.join(layout::VERSION_FILE);
        if !path.is_file() {
            return Err(BackupError::NotFound(path));
        }
        Ok(serde_json::from_slice(&fs::read(&path)?)?)
    }
}

/// True iff both versions share their major and minor components. Patch and
/// build may differ. Malformed versions are never compatible.
pub fn check_compatibility(backup: &VersionManifest, live: &VersionManifest) -> bool {
    match (major_minor(&backup.version), major_minor(&live.version)) {
        (Some(ours), Some(theirs)) => ours == theirs,
        _ => false,
    }
}

fn major_minor(version: &str) -> Option<(&str, &str)> {
    let mut parts = version.trim().split('.');
    let major = parts.next().filter(|p| !p.is_empty())?;
    let minor = parts.next().filter(|p| !p.is_empty())?;
    Some((major, minor))
}

/// Where the live platform version comes from.
pub trait VersionSource: Send + Sync {
    fn live_version(&self) -> impl Future<Output = Result<VersionManifest>> + Send;
}

/// Reads the version from the platform's discovery endpoint.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    client: reqwest::Client,
    endpoint: String,
}

impl DiscoveryClient {
    /// `endpoint` is the server root including the scheme, e.g. `http://localhost`.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn discover_url(&self) -> String {
        format!("{}/core/v1/discover", self.endpoint)
    }
}

impl VersionSource for DiscoveryClient {
    async fn live_version(&self) -> Result<VersionManifest> {
        let url = self.discover_url();
        debug!(url = %url, "Fetching platform version");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(BackupError::Transfer {
                operation: format!("Loading version information from {}", url),
                output: format!("HTTP {}", response.status()),
            });
        }

        let manifest: VersionManifest = response.json().await?;
        info!(version = %manifest.version, build = %manifest.build, "Live platform version");
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_patch_and_build_may_differ() {
        let backup = VersionManifest::new("2.3.1", "build-a");
        let live = VersionManifest::new("2.3.9", "build-b");
        assert!(check_compatibility(&backup, &live));
    }

    #[test]
    fn test_minor_mismatch_is_incompatible() {
        let backup = VersionManifest::new("2.3.0", "x");
        assert!(!check_compatibility(&backup, &VersionManifest::new("2.4.0", "x")));
        assert!(!check_compatibility(&backup, &VersionManifest::new("3.3.0", "x")));
        assert!(!check_compatibility(&backup, &VersionManifest::new("2", "x")));
    }

    #[test]
    fn test_manifest_file_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let manifest = VersionManifest::new("2.3.1", "abc123");

        manifest.write_to(temp_dir.path())?;

        assert_eq!(VersionManifest::read_from(temp_dir.path())?, manifest);
        let raw = fs::read_to_string(temp_dir.path().join("version.json"))?;
        assert_eq!(raw, r#"{"version":"2.3.1","build":"abc123"}"#);
        Ok(())
    }

    #[test]
    fn test_discovery_url_strips_trailing_slash() {
        let client = DiscoveryClient::new("https://platform.example.com/");
        assert_eq!(client.discover_url(), "https://platform.example.com/core/v1/discover");
    }
}
