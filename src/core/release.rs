/// Release index and artifact distribution
/// Backed by the GitHub releases API of the deployed application

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::utils::ReleaseSettings;

const USER_AGENT: &str = concat!("upkeep-cli/", env!("CARGO_PKG_VERSION"));

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Tag name of the newest published release, as published (may carry a `v`)
    async fn latest_tag(&self) -> Result<String>;

    /// Download the release artifact (gzip tarball) for `version` to `destination`
    async fn download(&self, version: &str, destination: &Path) -> Result<()>;
}

/// GitHub release API response
#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
}

pub struct GitHubReleases {
    api_base: String,
    repository: String,
    tag_prefix: String,
    timeout: Duration,
}

impl GitHubReleases {
    pub fn new(settings: &ReleaseSettings) -> Self {
        Self {
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            repository: settings.repository.clone(),
            tag_prefix: settings.tag_prefix.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    fn client(&self, timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")
    }

    pub fn latest_url(&self) -> String {
        format!("{}/repos/{}/releases/latest", self.api_base, self.repository)
    }

    pub fn tarball_url(&self, version: &str) -> String {
        format!(
            "{}/repos/{}/tarball/{}{}",
            self.api_base,
            self.repository,
            self.tag_prefix,
            version.trim_start_matches('v')
        )
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn latest_tag(&self) -> Result<String> {
        let response = self
            .client(Duration::from_secs(10))?
            .get(self.latest_url())
            .send()
            .await
            .context("Failed to fetch latest release")?;

        if !response.status().is_success() {
            anyhow::bail!("Release index returned HTTP {}", response.status());
        }

        let release: GitHubRelease = response
            .json()
            .await
            .context("Failed to parse release response")?;

        Ok(release.tag_name)
    }

    async fn download(&self, version: &str, destination: &Path) -> Result<()> {
        let url = self.tarball_url(version);
        tracing::info!(%url, "downloading release artifact");

        let response = self
            .client(self.timeout)?
            .get(&url)
            .send()
            .await
            .context("Failed to download release")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to download release {}: HTTP {}", version, response.status());
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read release bytes")?;

        std::fs::write(destination, &bytes).context("Failed to write downloaded file")?;
        tracing::debug!(size = bytes.len(), path = %destination.display(), "release artifact saved");

        Ok(())
    }
}
