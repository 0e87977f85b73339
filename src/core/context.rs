/// Wiring of the external collaborators shared by all engines

use std::sync::Arc;

use crate::core::database::DumpAdapter;
use crate::core::release::{GitHubReleases, ReleaseSource};
use crate::core::runner::{CommandRunner, SystemRunner};
use crate::core::supervisor::Supervisor;
use crate::core::toolchain::Toolchain;
use crate::core::version::VersionResolver;
use crate::utils::Settings;

#[derive(Clone)]
pub struct OpsContext {
    pub runner: Arc<dyn CommandRunner>,
    pub releases: Arc<dyn ReleaseSource>,
    pub settings: Settings,
}

impl OpsContext {
    pub fn new(runner: Arc<dyn CommandRunner>, releases: Arc<dyn ReleaseSource>, settings: Settings) -> Self {
        Self {
            runner,
            releases,
            settings,
        }
    }

    /// Real processes and the GitHub release index
    pub fn system(settings: Settings) -> Self {
        let releases = Arc::new(GitHubReleases::new(&settings.release));
        Self::new(Arc::new(SystemRunner::new()), releases, settings)
    }

    pub fn dump_adapter(&self) -> DumpAdapter {
        DumpAdapter::new(self.runner.clone())
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::new(self.runner.clone(), self.settings.tools.clone())
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.runner.clone(), self.settings.tools.clone())
    }

    pub fn versions(&self) -> VersionResolver {
        VersionResolver::new(self.releases.clone())
    }
}
