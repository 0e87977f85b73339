/// Helper utilities for the orchestrator

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::utils::{Settings, BUNDLE_PREFIX, PACKAGE_MANIFEST, ROOT_MARKERS};

/// A deployment root holds a package manifest next to at least one root marker
pub fn is_deployment_root(dir: &Path) -> bool {
    dir.join(PACKAGE_MANIFEST).is_file() && ROOT_MARKERS.iter().any(|m| dir.join(m).exists())
}

/// Get the deployment root directory
pub fn get_project_root(explicit: Option<&Path>) -> Result<PathBuf> {
    // 1. Explicit --root / UPKEEP_ROOT
    if let Some(root) = explicit {
        if !root.is_dir() {
            anyhow::bail!("Deployment root {} does not exist", root.display());
        }
        return Ok(root.to_path_buf());
    }

    // 2. Check saved configuration
    if let Ok(settings) = Settings::load_user() {
        if let Some(root) = settings.project_root {
            let path = PathBuf::from(&root);
            if is_deployment_root(&path) {
                return Ok(path);
            }
        }
    }

    // 3. Search current and parent directories
    let current_dir = std::env::current_dir().context("Failed to get current directory")?;

    let mut dir = current_dir.as_path();
    loop {
        if is_deployment_root(dir) {
            if let Err(e) = Settings::remember_project_root(dir) {
                tracing::debug!(error = %e, "could not remember deployment root");
            }
            return Ok(dir.to_path_buf());
        }

        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }

    anyhow::bail!(
        "Could not find a deployment root\n\n\
        Looked for package.json next to .env or docker-compose.yml.\n\n\
        Option 1 - Pass it explicitly:\n\
          upkeep-cli --root /path/to/deployment <command>\n\n\
        Option 2 - Set environment variable:\n\
          export UPKEEP_ROOT=/path/to/deployment\n\n\
        Option 3 - Run from the deployment directory:\n\
          cd /path/to/deployment && upkeep-cli <command>"
    )
}

/// Bundle directory name for a timestamp: second resolution, no colons
pub fn bundle_name(timestamp: &DateTime<Utc>) -> String {
    format!("{}{}", BUNDLE_PREFIX, timestamp.format("%Y-%m-%dT%H-%M-%SZ"))
}

/// Recursive on-disk byte size; unreadable entries count as zero
pub fn dir_size(path: &Path) -> u64 {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return 0,
    };

    if !metadata.is_dir() {
        return metadata.len();
    }

    fs::read_dir(path)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| dir_size(&entry.path()))
                .sum()
        })
        .unwrap_or(0)
}

/// Copy a directory tree, overwriting files that already exist at the destination
pub fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());

        if file_type.is_dir() {
            copied += copy_dir_all(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            {
                let link = fs::read_link(entry.path())?;
                if target.symlink_metadata().is_ok() {
                    fs::remove_file(&target)?;
                }
                std::os::unix::fs::symlink(&link, &target)?;
            }
            #[cfg(not(unix))]
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

/// Format bytes to human-readable size
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
