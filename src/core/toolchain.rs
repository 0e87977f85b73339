/// Dependency installer, schema-migration runner and build step
///
/// Command lines come from `[tools]` in the settings; every step runs in the
/// deployment root.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::core::error::OpsError;
use crate::core::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::utils::ToolSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: u32,
    pub output: String,
}

#[derive(Clone)]
pub struct Toolchain {
    runner: Arc<dyn CommandRunner>,
    tools: ToolSettings,
}

impl Toolchain {
    pub fn new(runner: Arc<dyn CommandRunner>, tools: ToolSettings) -> Self {
        Self { runner, tools }
    }

    async fn run_in(&self, argv: &[String], root: &Path) -> Result<CommandOutput, OpsError> {
        let spec = CommandSpec::from_argv(argv)?.current_dir(root);
        tracing::info!(command = %spec, "running");
        self.runner.run(&spec).await
    }

    /// Install dependencies in locked/reproducible mode
    pub async fn install_dependencies(&self, root: &Path) -> Result<(), OpsError> {
        self.run_in(&self.tools.install, root).await.map(|_| ())
    }

    pub async fn build(&self, root: &Path) -> Result<(), OpsError> {
        self.run_in(&self.tools.build, root).await.map(|_| ())
    }

    /// Apply pending schema migrations and report how many ran
    pub async fn migrate(&self, root: &Path) -> Result<MigrationReport, OpsError> {
        let output = self.run_in(&self.tools.migrate, root).await?;
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        let applied = count_applied_migrations(&combined);
        tracing::info!(applied, "migrations applied");

        Ok(MigrationReport {
            applied,
            output: combined,
        })
    }
}

#[derive(Deserialize)]
struct StructuredReport {
    applied: u32,
}

/// Number of applied migrations in a runner's output.
///
/// A JSON line `{"applied": N}` is authoritative. Otherwise the text is
/// scraped: explicit "N migrations applied" phrases, then the migration
/// directories listed under "have been applied:". Unrecognised output is 0.
pub fn count_applied_migrations(output: &str) -> u32 {
    static PHRASE_RE: OnceLock<Regex> = OnceLock::new();
    static ENTRY_RE: OnceLock<Regex> = OnceLock::new();

    let structured = output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<StructuredReport>(line).ok());
    if let Some(report) = structured {
        return report.applied;
    }

    if output.contains("No pending migrations") {
        return 0;
    }

    let phrase_re = PHRASE_RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:applied\s+(\d+)\s+migrations?|(\d+)\s+migrations?\s+(?:have\s+been\s+|were\s+)?applied)",
        )
        .unwrap()
    });
    if let Some(caps) = phrase_re.captures(output) {
        if let Some(n) = caps.get(1).or_else(|| caps.get(2)) {
            return n.as_str().parse().unwrap_or(0);
        }
    }

    // Tree listing after the "have been applied:" header, e.g.
    //   migrations/
    //     └─ 20240101000000_init/
    //       └─ migration.sql
    let entry_re = ENTRY_RE.get_or_init(|| Regex::new(r"^\s*[└├]─\s+(\S+)/\s*$").unwrap());
    output
        .split_once("have been applied:")
        .map(|(_, listing)| {
            listing
                .lines()
                .filter(|line| entry_re.is_match(line))
                .count() as u32
        })
        .unwrap_or(0)
}
