/// Process supervisor integration
///
/// Stops and restarts every managed service of the deployment (pm2 by
/// default, any stop-all/restart-all pair through settings).

use std::path::Path;
use std::sync::Arc;

use crate::core::error::OpsError;
use crate::core::runner::{CommandRunner, CommandSpec};
use crate::utils::ToolSettings;

#[derive(Clone)]
pub struct Supervisor {
    runner: Arc<dyn CommandRunner>,
    tools: ToolSettings,
}

impl Supervisor {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolSettings) -> Self {
        Self { runner, tools }
    }

    async fn supervisor_command(&self, argv: &[String], root: &Path) -> Result<String, OpsError> {
        let spec = CommandSpec::from_argv(argv)?.current_dir(root);
        tracing::info!(command = %spec, "process supervisor");
        Ok(self.runner.run(&spec).await?.stdout)
    }

    /// Stop all services
    pub async fn stop_all(&self, root: &Path) -> Result<(), OpsError> {
        self.supervisor_command(&self.tools.stop_all, root).await?;
        Ok(())
    }

    /// Restart all services
    pub async fn restart_all(&self, root: &Path) -> Result<(), OpsError> {
        self.supervisor_command(&self.tools.restart_all, root).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeRunner;

    #[tokio::test]
    async fn test_stop_and_restart_commands() {
        let runner = Arc::new(FakeRunner::new());
        let supervisor = Supervisor::new(runner.clone(), ToolSettings::default());

        supervisor.stop_all(Path::new("/srv/mall")).await.unwrap();
        supervisor.restart_all(Path::new("/srv/mall")).await.unwrap();

        assert_eq!(runner.calls(), vec!["pm2 stop all", "pm2 restart all"]);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail("pm2 restart", "[PM2][ERROR] Process all not found");
        let supervisor = Supervisor::new(runner, ToolSettings::default());

        let err = supervisor.restart_all(Path::new("/srv/mall")).await.unwrap_err();
        assert!(err.to_string().contains("Process all not found"));
    }
}
