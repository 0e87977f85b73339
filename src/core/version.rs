/// Version discovery and comparison
///
/// Versions are compared as (major, minor, patch) triples. Anything the
/// strict semver grammar would reject (`1.0`, `v2`, `1.2.3-beta`) is read
/// leniently: missing components are 0 and suffixes are ignored.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::core::release::ReleaseSource;
use crate::utils::{PACKAGE_MANIFEST, VERSION_FILE};

pub const UNKNOWN_VERSION: &str = "0.0.0";

/// Lenient (major, minor, patch) parse; pre-release and build metadata are dropped
pub fn parse_version(raw: &str) -> Version {
    let trimmed = raw.trim().trim_start_matches(|c| c == 'v' || c == 'V');
    let core = trimmed.split(|c| c == '-' || c == '+').next().unwrap_or("");

    let mut parts = core.split('.').map(|part| {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u64>().unwrap_or(0)
    });

    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    Version::new(major, minor, patch)
}

/// Triple-wise numeric comparison; `Less`/`Equal`/`Greater` correspond to -1/0/1
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = parse_version(a);
    let b = parse_version(b);
    (a.major, a.minor, a.patch).cmp(&(b.major, b.minor, b.patch))
}

/// -1, 0 or 1, for display
pub fn ordering_sign(ordering: Ordering) -> i8 {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Version information for display in the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
    version: Option<String>,
}

#[derive(Clone)]
pub struct VersionResolver {
    releases: Arc<dyn ReleaseSource>,
}

impl VersionResolver {
    pub fn new(releases: Arc<dyn ReleaseSource>) -> Self {
        Self { releases }
    }

    /// Locally installed version, `0.0.0` if it cannot be determined
    pub fn current_version(&self, root: &Path) -> String {
        current_version(root)
    }

    /// Latest published version. Fails open to `0.0.0` so that an unreachable
    /// release index reads as "no upgrade available".
    pub async fn latest_version(&self) -> String {
        match self.releases.latest_tag().await {
            Ok(tag) if !tag.trim().is_empty() => parse_version(&tag).to_string(),
            Ok(_) => {
                tracing::warn!("release index returned an empty tag, assuming {}", UNKNOWN_VERSION);
                UNKNOWN_VERSION.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "latest version lookup failed, assuming {}", UNKNOWN_VERSION);
                UNKNOWN_VERSION.to_string()
            }
        }
    }

    pub async fn check_for_updates(&self, root: &Path) -> VersionInfo {
        let current_version = self.current_version(root);
        let latest_version = self.latest_version().await;
        let update_available = compare_versions(&latest_version, &current_version) == Ordering::Greater;

        VersionInfo {
            current_version,
            latest_version,
            update_available,
        }
    }
}

pub fn current_version(root: &Path) -> String {
    let from_package = fs::read_to_string(root.join(PACKAGE_MANIFEST))
        .ok()
        .and_then(|contents| serde_json::from_str::<PackageManifest>(&contents).ok())
        .and_then(|manifest| manifest.version);

    let declared = from_package.or_else(|| {
        fs::read_to_string(root.join(VERSION_FILE))
            .ok()
            .map(|contents| contents.trim().to_string())
            .filter(|v| !v.is_empty())
    });

    match declared {
        Some(version) => parse_version(&version).to_string(),
        None => {
            tracing::debug!(root = %root.display(), "no declared version found");
            UNKNOWN_VERSION.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::release::MockReleaseSource;
    use tempfile::TempDir;

    #[test]
    fn test_compare_known_pairs() {
        assert_eq!(compare_versions("1.2.3", "1.2.4"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("v1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.3-beta.1", "1.2.3"), Ordering::Equal);
        assert_eq!(ordering_sign(compare_versions("1.2.3", "1.2.4")), -1);
    }

    #[test]
    fn test_compare_is_antisymmetric_and_reflexive() {
        let samples = ["0.0.0", "1", "1.0", "1.0.1", "1.2", "v2.0.0", "10.0.0", "1.2.3-rc", "garbage", ""];
        for a in samples {
            assert_eq!(compare_versions(a, a), Ordering::Equal, "{a}");
            for b in samples {
                assert_eq!(compare_versions(a, b), compare_versions(b, a).reverse(), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("3").to_string(), "3.0.0");
        assert_eq!(parse_version(" v4.5 ").to_string(), "4.5.0");
        assert_eq!(parse_version("not a version").to_string(), "0.0.0");
        assert_eq!(parse_version("1.2.3+build.7").to_string(), "1.2.3");
    }

    #[test]
    fn test_current_version_from_package_json() {
        let dir = TempDir::new().unwrap();
        assert_eq!(current_version(dir.path()), "0.0.0");

        fs::write(dir.path().join("VERSION"), "1.1\n").unwrap();
        assert_eq!(current_version(dir.path()), "1.1.0");

        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "mall", "version": "2.3.4", "private": true}"#,
        )
        .unwrap();
        assert_eq!(current_version(dir.path()), "2.3.4");
    }

    #[tokio::test]
    async fn test_latest_version_normalises_tag() {
        let mut releases = MockReleaseSource::new();
        releases
            .expect_latest_tag()
            .times(1)
            .returning(|| Ok("v1.5.0".to_string()));

        let resolver = VersionResolver::new(Arc::new(releases));
        assert_eq!(resolver.latest_version().await, "1.5.0");
    }

    #[tokio::test]
    async fn test_latest_version_fails_open() {
        let mut releases = MockReleaseSource::new();
        releases
            .expect_latest_tag()
            .returning(|| Err(anyhow::anyhow!("connection reset")));

        let resolver = VersionResolver::new(Arc::new(releases));
        assert_eq!(resolver.latest_version().await, UNKNOWN_VERSION);
    }

    #[tokio::test]
    async fn test_check_for_updates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"version": "1.0.0"}"#).unwrap();

        let mut releases = MockReleaseSource::new();
        releases
            .expect_latest_tag()
            .returning(|| Ok("1.1.0".to_string()));

        let info = VersionResolver::new(Arc::new(releases))
            .check_for_updates(dir.path())
            .await;
        assert!(info.update_available);
        assert_eq!(info.latest_version, "1.1.0");
    }
}
