/// Backup creation
///
/// A backup bundle is built component by component, in order: database dump,
/// configuration snapshot, uploads snapshot. The manifest is written last and
/// records what actually landed on disk. A failed database dump aborts the
/// remaining components; the bundle is kept and marked `incomplete`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::context::OpsContext;
use crate::core::database::DatabaseConfig;
use crate::core::error::{describe, OpsError};
use crate::core::lock::DeploymentLock;
use crate::core::manifest::{BundleStatus, Component, Components, Manifest, ManifestDatabase};
use crate::core::version::current_version;
use crate::utils::{bundle_name, copy_dir_all, dir_size, CONFIG_ARTIFACTS};

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub include_uploads: bool,
    /// Directory receiving the bundle, `<root>/backups` when unset
    pub output_dir: Option<PathBuf>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_uploads: true,
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
    pub success: bool,
    /// Bundle directory, present whenever one was created (even partially)
    pub path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
    pub components: Components,
    pub error: Option<String>,
}

impl BackupResult {
    fn pending(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            path: None,
            timestamp,
            size: 0,
            components: Components::default(),
            error: None,
        }
    }
}

pub struct BackupEngine {
    ctx: OpsContext,
}

impl BackupEngine {
    pub fn new(ctx: &OpsContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Create a backup bundle of the deployment at `root`
    pub async fn create_backup(&self, root: &Path, db: &DatabaseConfig, options: &BackupOptions) -> BackupResult {
        let _lock = match DeploymentLock::acquire(root) {
            Ok(lock) => lock,
            Err(e) => {
                let mut result = BackupResult::pending(Utc::now());
                result.error = Some(describe(&e));
                return result;
            }
        };

        self.create_unlocked(root, db, options).await
    }

    /// Backup body; the caller holds the deployment lock
    pub(crate) async fn create_unlocked(&self, root: &Path, db: &DatabaseConfig, options: &BackupOptions) -> BackupResult {
        let timestamp = Utc::now();
        let mut result = BackupResult::pending(timestamp);

        let base = options
            .output_dir
            .clone()
            .unwrap_or_else(|| self.ctx.settings.backups_path(root));
        let bundle = match allocate_bundle_dir(&base, &timestamp) {
            Ok(bundle) => bundle,
            Err(e) => {
                result.error = Some(format!("Failed to create bundle directory in {}: {}", base.display(), e));
                return result;
            }
        };
        result.path = Some(bundle.clone());
        tracing::info!(bundle = %bundle.display(), "creating backup");

        let outcome = self
            .capture_components(root, db, options, &bundle, &mut result.components)
            .await;

        let manifest = Manifest {
            version: current_version(root),
            timestamp,
            components: result.components,
            database: ManifestDatabase {
                engine: db.engine,
                name: db.name.clone(),
            },
            status: if outcome.is_ok() {
                BundleStatus::Complete
            } else {
                BundleStatus::Incomplete
            },
            error: outcome.as_ref().err().map(describe),
        };

        let written = manifest.write(&bundle);
        result.size = dir_size(&bundle);

        match (outcome, written) {
            (Ok(()), Ok(())) => {
                result.success = true;
                tracing::info!(bundle = %bundle.display(), size = result.size, "backup complete");
            }
            (Err(e), _) => {
                tracing::error!(bundle = %bundle.display(), error = %e, "backup aborted");
                result.error = Some(describe(&e));
            }
            (Ok(()), Err(e)) => {
                tracing::error!(bundle = %bundle.display(), error = %e, "manifest write failed");
                result.error = Some(format!("{:#}", e));
            }
        }

        result
    }

    async fn capture_components(
        &self,
        root: &Path,
        db: &DatabaseConfig,
        options: &BackupOptions,
        bundle: &Path,
        components: &mut Components,
    ) -> Result<(), OpsError> {
        // 1. Database (fatal for the rest of the bundle)
        self.ctx
            .dump_adapter()
            .dump(db, &Component::Database.bundle_path(bundle))
            .await
            .map_err(|e| component_error(Component::Database, e))?;
        components.database = true;

        // 2. Configuration files
        let copied = snapshot_config(root, &Component::Config.bundle_path(bundle))
            .map_err(|e| component_error(Component::Config, OpsError::Io(e)))?;
        components.config = copied > 0;
        tracing::info!(files = copied, "configuration captured");

        // 3. Uploads
        if options.include_uploads {
            let uploads = self.ctx.settings.uploads_path(root);
            if uploads.is_dir() {
                let files = copy_dir_all(&uploads, &Component::Uploads.bundle_path(bundle))
                    .map_err(|e| component_error(Component::Uploads, OpsError::Io(e)))?;
                components.uploads = true;
                tracing::info!(files, "uploads captured");
            } else {
                tracing::warn!(path = %uploads.display(), "uploads directory not found, skipping");
            }
        }

        Ok(())
    }
}

fn component_error(component: Component, err: OpsError) -> OpsError {
    match err {
        OpsError::ToolingMissing { .. } | OpsError::Connectivity(_) => err,
        other => OpsError::BackupComponent {
            component,
            reason: other.to_string(),
        },
    }
}

/// Create a fresh bundle directory; a second backup within the same second
/// gets a numeric suffix
fn allocate_bundle_dir(base: &Path, timestamp: &DateTime<Utc>) -> io::Result<PathBuf> {
    fs::create_dir_all(base)?;
    let name = bundle_name(timestamp);

    let mut suffix = 0;
    loop {
        let candidate = if suffix == 0 {
            base.join(&name)
        } else {
            base.join(format!("{}-{}", name, suffix))
        };
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Copy the closed list of configuration artifacts that exist at the root
fn snapshot_config(root: &Path, target: &Path) -> io::Result<usize> {
    let present: Vec<&str> = CONFIG_ARTIFACTS
        .iter()
        .copied()
        .filter(|name| root.join(name).is_file())
        .collect();
    if present.is_empty() {
        return Ok(0);
    }

    fs::create_dir_all(target)?;
    for name in &present {
        fs::copy(root.join(name), target.join(name))?;
    }
    Ok(present.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database::DatabaseEngine;
    use crate::core::release::MockReleaseSource;
    use crate::core::testing::{pg_config as db, seed_deployment, FakeRunner};
    use crate::utils::{Settings, DATABASE_DUMP_FILE, MANIFEST_FILE};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(runner: Arc<FakeRunner>) -> OpsContext {
        OpsContext::new(runner, Arc::new(MockReleaseSource::new()), Settings::default())
    }

    #[tokio::test]
    async fn test_full_backup_matches_manifest() {
        let dir = TempDir::new().unwrap();
        seed_deployment(dir.path());
        let runner = Arc::new(FakeRunner::new());
        let engine = BackupEngine::new(&context(runner.clone()));

        let result = engine
            .create_backup(dir.path(), &db(), &BackupOptions::default())
            .await;

        assert!(result.success, "{:?}", result.error);
        let bundle = result.path.clone().unwrap();
        assert!(bundle.starts_with(dir.path().join("backups")));
        assert!(bundle.file_name().unwrap().to_string_lossy().starts_with("backup-"));

        let manifest = Manifest::read(&bundle).unwrap();
        assert_eq!(manifest.components, result.components);
        assert_eq!(
            manifest.components,
            Components {
                database: true,
                config: true,
                uploads: true
            }
        );
        assert!(manifest.missing_content(&bundle).is_empty());
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.database.engine, DatabaseEngine::Postgres);
        assert!(manifest.is_complete());

        assert!(bundle.join("config/.env").is_file());
        assert!(bundle.join("config/ecosystem.config.js").is_file());
        assert!(!bundle.join("config/docker-compose.yml").exists());
        assert!(bundle.join("uploads/products/1.png").is_file());

        let dump_size = fs::metadata(bundle.join(DATABASE_DUMP_FILE)).unwrap().len();
        assert!(result.size >= dump_size);
        assert_eq!(result.size, dir_size(&bundle));
    }

    #[tokio::test]
    async fn test_uploads_optional() {
        let dir = TempDir::new().unwrap();
        seed_deployment(dir.path());
        let engine = BackupEngine::new(&context(Arc::new(FakeRunner::new())));
        let out = TempDir::new().unwrap();

        let result = engine
            .create_backup(
                dir.path(),
                &db(),
                &BackupOptions {
                    include_uploads: false,
                    output_dir: Some(out.path().to_path_buf()),
                },
            )
            .await;

        assert!(result.success);
        let bundle = result.path.unwrap();
        assert!(bundle.starts_with(out.path()));
        assert!(!result.components.uploads);
        assert!(!bundle.join("uploads").exists());
    }

    #[tokio::test]
    async fn test_database_failure_aborts_and_marks_incomplete() {
        let dir = TempDir::new().unwrap();
        seed_deployment(dir.path());
        let runner = Arc::new(FakeRunner::new());
        runner.fail("pg_dump", "pg_dump: error: permission denied for table orders");
        let engine = BackupEngine::new(&context(runner));

        let result = engine
            .create_backup(dir.path(), &db(), &BackupOptions::default())
            .await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("database backup failed"), "{error}");
        assert_eq!(result.components, Components::default());

        let bundle = result.path.unwrap();
        assert!(bundle.join(MANIFEST_FILE).is_file());
        assert!(!bundle.join("config").exists());
        let manifest = Manifest::read(&bundle).unwrap();
        assert_eq!(manifest.status, BundleStatus::Incomplete);
        assert!(manifest.error.is_some());
    }

    #[test]
    fn test_bundles_in_same_second_do_not_collide() {
        let base = TempDir::new().unwrap();
        let ts = Utc::now();
        let first = allocate_bundle_dir(base.path(), &ts).unwrap();
        let second = allocate_bundle_dir(base.path(), &ts).unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_locked_root_is_reported() {
        let dir = TempDir::new().unwrap();
        seed_deployment(dir.path());
        let _held = DeploymentLock::acquire(dir.path()).unwrap();
        let engine = BackupEngine::new(&context(Arc::new(FakeRunner::new())));

        let result = engine
            .create_backup(dir.path(), &db(), &BackupOptions::default())
            .await;
        assert!(!result.success);
        assert!(result.path.is_none());
        assert!(result.error.unwrap().contains("locked"));
    }
}
