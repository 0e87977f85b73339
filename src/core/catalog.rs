/// Listing of existing backup bundles, newest first

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::manifest::{BundleStatus, Components, Manifest};
use crate::utils::{dir_size, Settings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub version: String,
    pub components: Components,
    pub status: BundleStatus,
}

pub struct BackupCatalog {
    settings: Settings,
}

impl BackupCatalog {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.clone(),
        }
    }

    /// Restorable bundles of the deployment, newest first. A missing backups
    /// directory is an empty catalog.
    pub fn list(&self, root: &Path) -> Vec<BackupEntry> {
        scan(&self.settings.backups_path(root), false)
    }

    /// Every bundle with a manifest, including incomplete ones
    pub fn list_all(&self, root: &Path) -> Vec<BackupEntry> {
        scan(&self.settings.backups_path(root), true)
    }

    pub fn latest(&self, root: &Path) -> Option<BackupEntry> {
        self.list(root).into_iter().next()
    }
}

/// Scan a backups directory
pub fn scan(dir: &Path, include_incomplete: bool) -> Vec<BackupEntry> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut backups: Vec<BackupEntry> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| match Manifest::read(&path) {
            Ok(manifest) => Some((path, manifest)),
            Err(e) => {
                tracing::debug!(error = %e, "skipping directory without a usable manifest");
                None
            }
        })
        .filter(|(_, manifest)| include_incomplete || manifest.is_complete())
        .map(|(path, manifest)| BackupEntry {
            size: dir_size(&path),
            path,
            timestamp: manifest.timestamp,
            version: manifest.version,
            components: manifest.components,
            status: manifest.status,
        })
        .collect();

    backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.path.cmp(&a.path)));
    backups
}
