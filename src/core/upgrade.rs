/// Version upgrade pipeline
///
/// The upgrade runs as an explicit stage machine. Each stage returns a typed
/// outcome and the driver either advances or stops at the failed stage;
/// there is no automatic rollback, the result carries the backup path so the
/// caller can decide.

use flate2::read::GzDecoder;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;
use tar::EntryType;
use tempfile::TempDir;

use crate::core::backup::{BackupEngine, BackupOptions};
use crate::core::context::OpsContext;
use crate::core::database::DatabaseConfig;
use crate::core::error::{describe, OpsError};
use crate::core::lock::DeploymentLock;
use crate::core::version::{compare_versions, parse_version};
use crate::utils::{ENV_FILE, LOCK_FILE, RELEASE_ARTIFACT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeStage {
    Resolving,
    BackingUp,
    Downloading,
    Extracting,
    InstallingDependencies,
    Migrating,
    Building,
    Restarting,
    Cleanup,
}

impl fmt::Display for UpgradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpgradeStage::Resolving => "resolving versions",
            UpgradeStage::BackingUp => "backup",
            UpgradeStage::Downloading => "downloading release",
            UpgradeStage::Extracting => "extracting release",
            UpgradeStage::InstallingDependencies => "installing dependencies",
            UpgradeStage::Migrating => "running migrations",
            UpgradeStage::Building => "building",
            UpgradeStage::Restarting => "restarting services",
            UpgradeStage::Cleanup => "cleaning up",
        };
        write!(f, "{}", label)
    }
}

/// Stages after the version check, in execution order
const PIPELINE: [UpgradeStage; 8] = [
    UpgradeStage::BackingUp,
    UpgradeStage::Downloading,
    UpgradeStage::Extracting,
    UpgradeStage::InstallingDependencies,
    UpgradeStage::Migrating,
    UpgradeStage::Building,
    UpgradeStage::Restarting,
    UpgradeStage::Cleanup,
];

pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct UpgradeOptions {
    /// Explicit target; the latest published release when unset
    pub target_version: Option<String>,
    pub create_backup: bool,
    pub on_progress: Option<ProgressFn>,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            target_version: None,
            create_backup: true,
            on_progress: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeResult {
    pub success: bool,
    pub from_version: String,
    pub to_version: String,
    pub migrations_run: u32,
    /// Bundle taken before any file was touched
    pub backup_path: Option<PathBuf>,
    pub error: Option<String>,
    /// None when the failure happened before the pipeline started
    pub failed_stage: Option<UpgradeStage>,
    pub completed_stages: Vec<UpgradeStage>,
}

impl UpgradeResult {
    fn new(from_version: String, to_version: String) -> Self {
        Self {
            success: false,
            from_version,
            to_version,
            migrations_run: 0,
            backup_path: None,
            error: None,
            failed_stage: None,
            completed_stages: vec![UpgradeStage::Resolving],
        }
    }
}

/// Mutable state threaded through the stages
struct Run<'a> {
    root: &'a Path,
    db: &'a DatabaseConfig,
    to_version: &'a str,
    workspace: Option<TempDir>,
}

impl Run<'_> {
    fn artifact(&self) -> Result<PathBuf, OpsError> {
        self.workspace
            .as_ref()
            .map(|dir| dir.path().join(RELEASE_ARTIFACT))
            .ok_or_else(|| OpsError::Other(anyhow::anyhow!("release artifact was not downloaded")))
    }
}

pub struct UpgradeOrchestrator {
    ctx: OpsContext,
}

impl UpgradeOrchestrator {
    pub fn new(ctx: &OpsContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    pub async fn upgrade(&self, root: &Path, db: &DatabaseConfig, options: &UpgradeOptions) -> UpgradeResult {
        let report = |message: &str| {
            if let Some(on_progress) = &options.on_progress {
                on_progress(message);
            }
        };

        report("Checking versions...");
        let versions = self.ctx.versions();
        let from_version = versions.current_version(root);
        let to_version = match &options.target_version {
            Some(target) => parse_version(target).to_string(),
            None => versions.latest_version().await,
        };
        let mut result = UpgradeResult::new(from_version, to_version);

        if compare_versions(&result.from_version, &result.to_version) != Ordering::Less {
            tracing::info!(
                current = %result.from_version,
                target = %result.to_version,
                "already up to date, nothing to do"
            );
            report(&format!("Already at {}", result.from_version));
            result.success = true;
            return result;
        }

        let _lock = match DeploymentLock::acquire(root) {
            Ok(lock) => lock,
            Err(e) => {
                result.error = Some(describe(&e));
                return result;
            }
        };

        tracing::info!(from = %result.from_version, to = %result.to_version, "starting upgrade");
        let to_version = result.to_version.clone();
        let mut run = Run {
            root,
            db,
            to_version: &to_version,
            workspace: None,
        };

        for stage in PIPELINE {
            if stage == UpgradeStage::BackingUp && !options.create_backup {
                tracing::warn!("upgrading without a backup");
                continue;
            }

            report(&format!("{}...", capitalize(&stage.to_string())));
            tracing::info!(%stage, "stage started");

            if let Err(e) = self.execute(stage, &mut run, &mut result).await {
                let err = match e {
                    OpsError::UpgradeStep { .. } => e,
                    other => OpsError::upgrade_step(stage, describe(&other)),
                };
                tracing::error!(%stage, error = %err, "upgrade failed");
                report(&format!("Failed: {}", err));
                result.error = Some(describe(&err));
                result.failed_stage = Some(stage);
                return result;
            }
            result.completed_stages.push(stage);
        }

        report(&format!("Upgraded to {}", result.to_version));
        tracing::info!(
            version = %result.to_version,
            migrations = result.migrations_run,
            "upgrade complete"
        );
        result.success = true;
        result
    }

    async fn execute(&self, stage: UpgradeStage, run: &mut Run<'_>, result: &mut UpgradeResult) -> Result<(), OpsError> {
        match stage {
            UpgradeStage::Resolving => Ok(()),
            UpgradeStage::BackingUp => {
                let backup = BackupEngine::new(&self.ctx)
                    .create_unlocked(run.root, run.db, &BackupOptions::default())
                    .await;
                result.backup_path = backup.path;
                if !backup.success {
                    let reason = backup.error.unwrap_or_else(|| "unknown error".to_string());
                    return Err(OpsError::upgrade_step(
                        stage,
                        match &result.backup_path {
                            Some(path) => format!("{} (partial bundle at {})", reason, path.display()),
                            None => reason,
                        },
                    ));
                }
                Ok(())
            }
            UpgradeStage::Downloading => {
                let workspace = tempfile::Builder::new().prefix("upkeep-release-").tempdir()?;
                let artifact = workspace.path().join(RELEASE_ARTIFACT);
                run.workspace = Some(workspace);
                self.ctx
                    .releases
                    .download(run.to_version, &artifact)
                    .await
                    .map_err(|e| OpsError::upgrade_step(stage, format!("{:#}", e)))
            }
            UpgradeStage::Extracting => {
                let artifact = run.artifact()?;
                let root = run.root.to_path_buf();
                let excluded = self.protected_paths();
                let written = tokio::task::spawn_blocking(move || extract_release(&artifact, &root, &excluded))
                    .await
                    .map_err(|e| OpsError::upgrade_step(stage, e))??;
                tracing::info!(files = written, "release extracted");
                Ok(())
            }
            UpgradeStage::InstallingDependencies => self.ctx.toolchain().install_dependencies(run.root).await,
            UpgradeStage::Migrating => {
                let report = self.ctx.toolchain().migrate(run.root).await?;
                result.migrations_run = report.applied;
                Ok(())
            }
            UpgradeStage::Building => self.ctx.toolchain().build(run.root).await,
            UpgradeStage::Restarting => self.ctx.supervisor().restart_all(run.root).await,
            UpgradeStage::Cleanup => {
                if let Some(workspace) = run.workspace.take() {
                    workspace.close()?;
                }
                Ok(())
            }
        }
    }

    /// Root-relative paths a release payload must never overwrite
    fn protected_paths(&self) -> Vec<PathBuf> {
        vec![
            PathBuf::from(ENV_FILE),
            PathBuf::from(LOCK_FILE),
            PathBuf::from(&self.ctx.settings.backups_dir),
            PathBuf::from(&self.ctx.settings.uploads_dir),
        ]
    }
}

fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Extract a gzip release tarball over `root`.
///
/// The archive's single top-level directory is stripped. Entries under any
/// `excluded` path are skipped; entries with absolute or parent-relative
/// paths, hard links, and symlinks pointing out of the tree abort the
/// extraction. Destinations are resolved through links already on disk, so
/// an earlier symlink entry cannot redirect a later one onto a protected
/// path or out of `root`. Returns the number of entries written.
pub fn extract_release(archive: &Path, root: &Path, excluded: &[PathBuf]) -> io::Result<usize> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    let root = root.canonicalize()?;
    let mut written = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if matches!(kind, EntryType::XGlobalHeader | EntryType::XHeader) {
            continue;
        }

        let raw = entry.path()?.into_owned();
        let relative = match strip_top_level(&raw)? {
            Some(relative) => relative,
            None => continue,
        };
        if is_protected(&relative, excluded) {
            tracing::debug!(path = %relative.display(), "protected path, not overwritten");
            continue;
        }

        match kind {
            EntryType::Link => return Err(unsafe_entry(&raw, "hard links are not allowed")),
            EntryType::Symlink => {
                let link = entry
                    .link_name()?
                    .ok_or_else(|| unsafe_entry(&raw, "symlink without a target"))?;
                if !link_stays_inside(&relative, &link) {
                    return Err(unsafe_entry(&raw, "symlink points outside the deployment"));
                }
            }
            _ => {}
        }

        let target = resolve_destination(&root, &relative)?;
        let resolved = target.strip_prefix(&root).unwrap_or(&target);
        if is_protected(resolved, excluded) {
            tracing::debug!(
                path = %relative.display(),
                resolved = %resolved.display(),
                "entry resolves onto a protected path, not overwritten"
            );
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if kind != EntryType::Directory {
            if let Ok(meta) = fs::symlink_metadata(&target) {
                if meta.file_type().is_symlink() || (kind == EntryType::Symlink && meta.is_file()) {
                    fs::remove_file(&target)?;
                }
            }
        }
        entry.unpack(&target)?;
        written += 1;
    }

    Ok(written)
}

fn is_protected(relative: &Path, excluded: &[PathBuf]) -> bool {
    excluded.iter().any(|protected| relative.starts_with(protected))
}

fn unsafe_entry(path: &Path, reason: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unsafe entry in release archive: {}: {}", path.display(), reason),
    )
}

/// Where `relative` lands once links already present under `root` are
/// followed. Fails if any existing ancestor resolves outside `root`.
fn resolve_destination(root: &Path, relative: &Path) -> io::Result<PathBuf> {
    let mut resolved = root.to_path_buf();
    let mut on_disk = true;

    if let Some(parent) = relative.parent() {
        for part in parent.components() {
            resolved.push(part);
            if on_disk && fs::symlink_metadata(&resolved).is_ok() {
                resolved = resolved.canonicalize()?;
                if !resolved.starts_with(root) {
                    return Err(unsafe_entry(relative, "resolves outside the deployment"));
                }
            } else {
                on_disk = false;
            }
        }
    }

    match relative.file_name() {
        Some(name) => Ok(resolved.join(name)),
        None => Ok(resolved),
    }
}

/// Whether a symlink at `relative` with target `link` stays under the root
fn link_stays_inside(relative: &Path, link: &Path) -> bool {
    let mut depth = relative.components().count().saturating_sub(1);
    for component in link.components() {
        match component {
            PathComponent::Normal(_) => depth += 1,
            PathComponent::CurDir => {}
            PathComponent::ParentDir => match depth.checked_sub(1) {
                Some(up) => depth = up,
                None => return false,
            },
            PathComponent::RootDir | PathComponent::Prefix(_) => return false,
        }
    }
    true
}

/// Drop the archive's top-level directory. `None` for the directory itself.
fn strip_top_level(path: &Path) -> io::Result<Option<PathBuf>> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            PathComponent::Normal(part) => parts.push(part),
            PathComponent::CurDir => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsafe path in release archive: {}", path.display()),
                ))
            }
        }
    }

    if parts.len() < 2 {
        return Ok(None);
    }
    Ok(Some(parts[1..].iter().collect()))
}
