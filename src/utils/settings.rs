/// Orchestrator settings
/// Read from `upkeep.toml` in the deployment root, or ~/.config/upkeep-cli/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{DEFAULT_BACKUPS_DIR, DEFAULT_UPLOADS_DIR, SETTINGS_FILE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Remembered deployment root (user-level config only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
    pub backups_dir: String,
    pub uploads_dir: String,
    pub release: ReleaseSettings,
    pub tools: ToolSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// `owner/name` of the application repository
    pub repository: String,
    pub api_base: String,
    /// Prepended to the bare version to form the release tag
    pub tag_prefix: String,
    /// Download timeout for release artifacts
    pub timeout_secs: u64,
}

/// Command lines of the external collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub install: Vec<String>,
    pub migrate: Vec<String>,
    pub build: Vec<String>,
    pub stop_all: Vec<String>,
    pub restart_all: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_root: None,
            backups_dir: DEFAULT_BACKUPS_DIR.to_string(),
            uploads_dir: DEFAULT_UPLOADS_DIR.to_string(),
            release: ReleaseSettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            repository: "jiffoo/jiffoo-mall-core".to_string(),
            api_base: "https://api.github.com".to_string(),
            tag_prefix: "v".to_string(),
            timeout_secs: 300,
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            install: argv(&["pnpm", "install", "--frozen-lockfile"]),
            migrate: argv(&["pnpm", "prisma", "migrate", "deploy"]),
            build: argv(&["pnpm", "build"]),
            stop_all: argv(&["pm2", "stop", "all"]),
            restart_all: argv(&["pm2", "restart", "all"]),
        }
    }
}

impl Settings {
    /// User-level config file path
    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine the user config directory")?
            .join("upkeep-cli");
        Ok(config_dir.join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }

    /// Load user-level settings, defaults if absent
    pub fn load_user() -> Result<Self> {
        let path = Self::user_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    /// Resolve settings for a deployment: explicit file, then `<root>/upkeep.toml`,
    /// then the user config, then defaults
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let local = root.join(SETTINGS_FILE);
        if local.exists() {
            return Self::from_file(&local);
        }

        Self::load_user()
    }

    /// Save to the user-level config file
    pub fn save_user(&self) -> Result<()> {
        let path = Self::user_config_path()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(&path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Remember a deployment root in the user config
    pub fn remember_project_root(root: &Path) -> Result<()> {
        let mut settings = Self::load_user()?;
        settings.project_root = Some(root.to_string_lossy().to_string());
        settings.save_user()
    }

    pub fn backups_path(&self, root: &Path) -> PathBuf {
        root.join(&self.backups_dir)
    }

    pub fn uploads_path(&self, root: &Path) -> PathBuf {
        root.join(&self.uploads_dir)
    }
}
