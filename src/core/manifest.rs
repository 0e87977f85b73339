/// Backup bundle manifest (`manifest.json`)
///
/// The manifest is the ground truth of what a bundle contains. It is written
/// once, after every requested component has finished, and never mutated.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::core::database::DatabaseEngine;
use crate::core::error::OpsError;
use crate::utils::{CONFIG_SNAPSHOT_DIR, DATABASE_DUMP_FILE, MANIFEST_FILE, UPLOADS_SNAPSHOT_DIR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Database,
    Config,
    Uploads,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Database, Component::Config, Component::Uploads];

    /// Location of this component's content inside a bundle
    pub fn bundle_path(&self, bundle: &Path) -> std::path::PathBuf {
        match self {
            Component::Database => bundle.join(DATABASE_DUMP_FILE),
            Component::Config => bundle.join(CONFIG_SNAPSHOT_DIR),
            Component::Uploads => bundle.join(UPLOADS_SNAPSHOT_DIR),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Database => "database",
            Component::Config => "config",
            Component::Uploads => "uploads",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Components {
    pub database: bool,
    pub config: bool,
    pub uploads: bool,
}

impl Components {
    pub fn get(&self, component: Component) -> bool {
        match component {
            Component::Database => self.database,
            Component::Config => self.config,
            Component::Uploads => self.uploads,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    #[default]
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDatabase {
    #[serde(rename = "type")]
    pub engine: DatabaseEngine,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub components: Components,
    pub database: ManifestDatabase,
    #[serde(default)]
    pub status: BundleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Manifest {
    pub fn is_complete(&self) -> bool {
        self.status == BundleStatus::Complete
    }

    pub fn write(&self, bundle: &Path) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        fs::write(bundle.join(MANIFEST_FILE), contents)
            .with_context(|| format!("Failed to write manifest in {}", bundle.display()))?;
        Ok(())
    }

    /// Read a bundle's manifest; a missing or unreadable manifest makes the
    /// bundle unrestorable
    pub fn read(bundle: &Path) -> Result<Self, OpsError> {
        let path = bundle.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(OpsError::integrity(bundle, format!("{} is missing", MANIFEST_FILE)));
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| OpsError::integrity(bundle, format!("cannot read {}: {}", MANIFEST_FILE, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| OpsError::integrity(bundle, format!("{} is malformed: {}", MANIFEST_FILE, e)))
    }

    /// Components flagged `true` whose content is absent from the bundle
    pub fn missing_content(&self, bundle: &Path) -> Vec<Component> {
        Component::ALL
            .into_iter()
            .filter(|c| self.components.get(*c) && !c.bundle_path(bundle).exists())
            .collect()
    }
}
