/// Restore from a backup bundle
///
/// The manifest is authoritative: a requested component whose manifest flag
/// is false is skipped, and every integrity check runs before anything in the
/// deployment or database is touched.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::core::context::OpsContext;
use crate::core::database::DatabaseConfig;
use crate::core::error::{describe, OpsError};
use crate::core::lock::DeploymentLock;
use crate::core::manifest::{Component, Manifest};
use crate::utils::copy_dir_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    pub restore_database: bool,
    pub restore_config: bool,
    pub restore_uploads: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            restore_database: true,
            restore_config: true,
            restore_uploads: true,
        }
    }
}

impl RestoreOptions {
    pub fn requested(&self, component: Component) -> bool {
        match component {
            Component::Database => self.restore_database,
            Component::Config => self.restore_config,
            Component::Uploads => self.restore_uploads,
        }
    }
}

/// Outcome of restore and rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(err: &OpsError) -> Self {
        Self {
            success: false,
            error: Some(describe(err)),
        }
    }
}

pub struct RestoreEngine {
    ctx: OpsContext,
}

impl RestoreEngine {
    pub fn new(ctx: &OpsContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    pub async fn restore(
        &self,
        bundle: &Path,
        root: &Path,
        db: &DatabaseConfig,
        options: &RestoreOptions,
    ) -> OperationResult {
        // Validate before locking so a bad bundle never touches the root
        if let Err(e) = Manifest::read(bundle) {
            return OperationResult::failed(&e);
        }

        let _lock = match DeploymentLock::acquire(root) {
            Ok(lock) => lock,
            Err(e) => return OperationResult::failed(&e),
        };

        match self.restore_unlocked(bundle, root, db, options).await {
            Ok(restored) => {
                tracing::info!(bundle = %bundle.display(), ?restored, "restore complete");
                OperationResult::ok()
            }
            Err(e) => {
                tracing::error!(bundle = %bundle.display(), error = %e, "restore failed");
                OperationResult::failed(&e)
            }
        }
    }

    /// Restore body; the caller holds the deployment lock. Returns the
    /// components actually restored.
    pub(crate) async fn restore_unlocked(
        &self,
        bundle: &Path,
        root: &Path,
        db: &DatabaseConfig,
        options: &RestoreOptions,
    ) -> Result<Vec<Component>, OpsError> {
        let manifest = Manifest::read(bundle)?;
        let plan = plan(&manifest, bundle, db, options)?;

        for component in &plan {
            let source = component.bundle_path(bundle);
            match component {
                Component::Database => {
                    self.ctx.dump_adapter().restore(db, &source).await?;
                }
                Component::Config => {
                    let restored = restore_config(&source, root)?;
                    tracing::info!(files = restored, "configuration restored");
                }
                Component::Uploads => {
                    let files = copy_dir_all(&source, &self.ctx.settings.uploads_path(root))?;
                    tracing::info!(files, "uploads restored");
                }
            }
        }

        Ok(plan)
    }
}

/// Decide which components to restore, failing on any integrity problem
fn plan(
    manifest: &Manifest,
    bundle: &Path,
    db: &DatabaseConfig,
    options: &RestoreOptions,
) -> Result<Vec<Component>, OpsError> {
    if !manifest.is_complete() {
        let reason = manifest.error.as_deref().unwrap_or("backup did not finish");
        return Err(OpsError::integrity(
            bundle,
            format!("bundle is marked incomplete ({})", reason),
        ));
    }

    let mut plan = Vec::new();
    for component in Component::ALL {
        if !options.requested(component) {
            continue;
        }
        if !manifest.components.get(component) {
            tracing::debug!(%component, "not present in bundle, skipping");
            continue;
        }
        plan.push(component);
    }

    let missing: Vec<String> = manifest
        .missing_content(bundle)
        .into_iter()
        .filter(|c| plan.contains(c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(OpsError::integrity(
            bundle,
            format!("manifest lists {} but the data is absent", missing.join(", ")),
        ));
    }

    if plan.contains(&Component::Database) && manifest.database.engine != db.engine {
        return Err(OpsError::integrity(
            bundle,
            format!(
                "bundle holds a {} dump but the deployment uses {}",
                manifest.database.engine, db.engine
            ),
        ));
    }

    Ok(plan)
}

/// Copy every snapshot file back to the deployment root, overwriting
fn restore_config(snapshot: &Path, root: &Path) -> std::io::Result<usize> {
    let mut restored = 0;
    for entry in fs::read_dir(snapshot)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), root.join(entry.file_name()))?;
            restored += 1;
        }
    }
    Ok(restored)
}
