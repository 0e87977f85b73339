/// Rollback to a known-good backup bundle
///
/// Order is strict: verify, stop services, restore, reinstall, restart. A
/// failure after services were stopped leaves them stopped; a deployment
/// running against a half-restored database is worse than one that is down.

use std::fmt;
use std::path::Path;

use crate::core::context::OpsContext;
use crate::core::database::DatabaseConfig;
use crate::core::error::{describe, OpsError};
use crate::core::lock::DeploymentLock;
use crate::core::manifest::Manifest;
use crate::core::restore::{OperationResult, RestoreEngine, RestoreOptions};
use crate::core::upgrade::ProgressFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackStage {
    Verifying,
    Stopping,
    Restoring,
    Reinstalling,
    Restarting,
}

impl fmt::Display for RollbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RollbackStage::Verifying => "verifying bundle",
            RollbackStage::Stopping => "stopping services",
            RollbackStage::Restoring => "restoring bundle",
            RollbackStage::Reinstalling => "reinstalling dependencies",
            RollbackStage::Restarting => "restarting services",
        };
        write!(f, "{}", label)
    }
}

pub struct RollbackEngine {
    ctx: OpsContext,
}

impl RollbackEngine {
    pub fn new(ctx: &OpsContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    pub async fn rollback(
        &self,
        bundle: &Path,
        root: &Path,
        db: &DatabaseConfig,
        on_progress: Option<ProgressFn>,
    ) -> OperationResult {
        let report = |stage: RollbackStage| {
            tracing::info!(%stage, "rollback stage");
            if let Some(on_progress) = &on_progress {
                on_progress(&stage.to_string());
            }
        };

        report(RollbackStage::Verifying);
        if let Err(e) = verify_bundle(bundle) {
            tracing::error!(bundle = %bundle.display(), error = %e, "rollback refused");
            return OperationResult::failed(&e);
        }

        let _lock = match DeploymentLock::acquire(root) {
            Ok(lock) => lock,
            Err(e) => return OperationResult::failed(&e),
        };

        match self.run(bundle, root, db, &report).await {
            Ok(()) => {
                tracing::info!(bundle = %bundle.display(), "rollback complete");
                OperationResult::ok()
            }
            Err(e) => {
                tracing::error!(bundle = %bundle.display(), error = %e, "rollback failed");
                OperationResult::failed(&e)
            }
        }
    }

    async fn run(
        &self,
        bundle: &Path,
        root: &Path,
        db: &DatabaseConfig,
        report: &impl Fn(RollbackStage),
    ) -> Result<(), OpsError> {
        let supervisor = self.ctx.supervisor();

        report(RollbackStage::Stopping);
        supervisor
            .stop_all(root)
            .await
            .map_err(|e| OpsError::rollback_step(RollbackStage::Stopping, describe(&e)))?;

        report(RollbackStage::Restoring);
        RestoreEngine::new(&self.ctx)
            .restore_unlocked(bundle, root, db, &RestoreOptions::default())
            .await
            .map_err(|e| OpsError::RollbackOrdering(describe(&e)))?;

        report(RollbackStage::Reinstalling);
        self.ctx
            .toolchain()
            .install_dependencies(root)
            .await
            .map_err(|e| OpsError::rollback_step(RollbackStage::Reinstalling, describe(&e)))?;

        report(RollbackStage::Restarting);
        supervisor
            .restart_all(root)
            .await
            .map_err(|e| OpsError::rollback_step(RollbackStage::Restarting, describe(&e)))
    }
}

fn verify_bundle(bundle: &Path) -> Result<(), OpsError> {
    if !bundle.is_dir() {
        return Err(OpsError::integrity(bundle, "bundle directory does not exist"));
    }
    let manifest = Manifest::read(bundle)?;
    if !manifest.is_complete() {
        return Err(OpsError::integrity(bundle, "bundle is marked incomplete"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backup::{BackupEngine, BackupOptions};
    use crate::core::release::MockReleaseSource;
    use crate::core::testing::{pg_config, seed_deployment, FakeRunner, FAKE_DUMP};
    use crate::utils::{Settings, DATABASE_DUMP_FILE};
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn engine(runner: Arc<FakeRunner>) -> RollbackEngine {
        let ctx = OpsContext::new(runner, Arc::new(MockReleaseSource::new()), Settings::default());
        RollbackEngine::new(&ctx)
    }

    async fn bundle_of(root: &Path) -> PathBuf {
        let ctx = OpsContext::new(
            Arc::new(FakeRunner::new()),
            Arc::new(MockReleaseSource::new()),
            Settings::default(),
        );
        let result = BackupEngine::new(&ctx)
            .create_backup(root, &pg_config(), &BackupOptions::default())
            .await;
        assert!(result.success, "{:?}", result.error);
        result.path.unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_order() {
        let root = TempDir::new().unwrap();
        seed_deployment(root.path());
        let bundle = bundle_of(root.path()).await;
        fs::write(root.path().join(".env"), "DATABASE_URL=changed-by-upgrade").unwrap();

        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        let runner = Arc::new(FakeRunner::new());
        let result = engine(runner.clone())
            .rollback(
                &bundle,
                root.path(),
                &pg_config(),
                Some(Arc::new(move |stage: &str| sink.lock().unwrap().push(stage.to_string()))),
            )
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(runner.calls().len(), 4);
        assert_eq!(runner.calls()[0], "pm2 stop all");
        assert!(runner.calls()[1].starts_with("psql"));
        assert_eq!(runner.calls()[2], "pnpm install --frozen-lockfile");
        assert_eq!(runner.calls()[3], "pm2 restart all");
        assert_eq!(runner.stdin_payloads(), vec![FAKE_DUMP.to_vec()]);
        assert!(fs::read_to_string(root.path().join(".env"))
            .unwrap()
            .contains("postgresql://"));
        assert_eq!(stages.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_restore_failure_leaves_services_stopped() {
        let root = TempDir::new().unwrap();
        seed_deployment(root.path());
        let bundle = bundle_of(root.path()).await;

        let runner = Arc::new(FakeRunner::new());
        runner.fail("psql", "ERROR: relation \"products\" already exists");
        let result = engine(runner.clone())
            .rollback(&bundle, root.path(), &pg_config(), None)
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("services left down"));
        assert!(runner.ran("pm2 stop all"));
        assert!(!runner.ran("pm2 restart"));
        assert!(!runner.ran("pnpm install"));
    }

    #[tokio::test]
    async fn test_integrity_failure_after_stop_is_an_ordering_failure() {
        let root = TempDir::new().unwrap();
        seed_deployment(root.path());
        let bundle = bundle_of(root.path()).await;
        fs::remove_file(bundle.join(DATABASE_DUMP_FILE)).unwrap();

        let runner = Arc::new(FakeRunner::new());
        let result = engine(runner.clone())
            .rollback(&bundle, root.path(), &pg_config(), None)
            .await;

        assert!(!result.success);
        assert!(runner.ran("pm2 stop all"));
        assert!(!runner.ran("pm2 restart"));
    }

    #[tokio::test]
    async fn test_missing_bundle_touches_nothing() {
        let root = TempDir::new().unwrap();
        seed_deployment(root.path());

        let runner = Arc::new(FakeRunner::new());
        let result = engine(runner.clone())
            .rollback(&root.path().join("backups/nope"), root.path(), &pg_config(), None)
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("does not exist"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reinstall_failure_skips_restart() {
        let root = TempDir::new().unwrap();
        seed_deployment(root.path());
        let bundle = bundle_of(root.path()).await;

        let runner = Arc::new(FakeRunner::new());
        runner.fail("pnpm install", "network timeout");
        let result = engine(runner.clone())
            .rollback(&bundle, root.path(), &pg_config(), None)
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("reinstalling dependencies failed"));
        assert!(!runner.ran("pm2 restart"));
    }

    #[tokio::test]
    async fn test_stop_failure_is_a_rollback_step_error() {
        let root = TempDir::new().unwrap();
        seed_deployment(root.path());
        let bundle = bundle_of(root.path()).await;

        let runner = Arc::new(FakeRunner::new());
        runner.fail("pm2 stop", "[PM2] daemon not running");
        let err = engine(runner.clone())
            .run(&bundle, root.path(), &pg_config(), &|_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, OpsError::RollbackStep { ref stage, .. } if stage == "stopping services"));
        assert!(!runner.ran("psql"));
        assert!(!runner.ran("pm2 restart"));
    }

    #[tokio::test]
    async fn test_restart_failure_is_reported() {
        let root = TempDir::new().unwrap();
        seed_deployment(root.path());
        let bundle = bundle_of(root.path()).await;

        let runner = Arc::new(FakeRunner::new());
        runner.fail("pm2 restart", "[PM2] process not found");
        let result = engine(runner.clone())
            .rollback(&bundle, root.path(), &pg_config(), None)
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("restarting services failed"));
        assert!(runner.ran("pnpm install"));
    }
}
