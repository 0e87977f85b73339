use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use upkeep_cli::cli::{self, BackupCommands, Cli, Commands, GlobalArgs};
use upkeep_cli::core::manifest::BundleStatus;
use upkeep_cli::core::version::ordering_sign;
use upkeep_cli::core::{
    compare_versions, BackupCatalog, BackupEngine, BackupOptions, DatabaseConfig, OperationResult, OpsContext,
    RestoreEngine, RestoreOptions, RollbackEngine, UpgradeOptions, UpgradeOrchestrator,
};
use upkeep_cli::utils::{format_bytes, get_project_root, logging, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.global.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red(), e);
            ExitCode::FAILURE
        }
    }
}

/// Dispatch a command; `Ok(false)` when the operation reported failure
async fn run(cli: Cli) -> Result<bool> {
    let global = cli.global;

    match cli.command {
        Commands::Compare { a, b } => {
            println!("{}", ordering_sign(compare_versions(&a, &b)));
            Ok(true)
        }
        Commands::Version { latest } => handle_version(&global, latest).await,
        Commands::Backup { command } => handle_backup(&global, command).await,
        Commands::Upgrade {
            check,
            target,
            no_backup,
        } => handle_upgrade(&global, check, target, no_backup).await,
        Commands::Rollback { bundle } => handle_rollback(&global, bundle).await,
    }
}

/// Deployment root, settings and wired collaborators for one invocation
struct Session {
    root: PathBuf,
    ctx: OpsContext,
}

impl Session {
    fn open(global: &GlobalArgs) -> Result<Self> {
        let root = get_project_root(global.root.as_deref())?;
        let settings = Settings::load(global.config.as_deref(), &root)?;
        tracing::debug!(root = %root.display(), "deployment root resolved");

        Ok(Self {
            root,
            ctx: OpsContext::system(settings),
        })
    }

    fn database(&self) -> Result<DatabaseConfig> {
        DatabaseConfig::from_env_file(&self.root)
            .with_context(|| format!("Failed to read database settings from {}", self.root.display()))
    }
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::default_spinner());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(message.to_string());
    bar
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_outcome(global: &GlobalArgs, action: &str, result: &OperationResult) -> Result<bool> {
    if global.json {
        print_json(result)?;
    } else if result.success {
        println!("{} {} complete", "✓".green(), action);
    } else {
        println!(
            "{} {} failed: {}",
            "✗".red(),
            action,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(result.success)
}

fn elapsed(started: Instant) -> String {
    humantime::format_duration(Duration::from_secs(started.elapsed().as_secs())).to_string()
}

async fn handle_version(global: &GlobalArgs, latest: bool) -> Result<bool> {
    let session = Session::open(global)?;
    let versions = session.ctx.versions();

    if latest {
        let info = versions.check_for_updates(&session.root).await;
        if global.json {
            print_json(&info)?;
        } else {
            println!("Installed: {}", info.current_version);
            println!("Latest:    {}", info.latest_version);
        }
    } else {
        let current = versions.current_version(&session.root);
        if global.json {
            print_json(&serde_json::json!({ "current_version": current }))?;
        } else {
            println!("{}", current);
        }
    }

    tracing::debug!(build = cli::BUILD_TIMESTAMP, tool = cli::get_version(), "version reported");
    Ok(true)
}

async fn handle_backup(global: &GlobalArgs, command: BackupCommands) -> Result<bool> {
    let session = Session::open(global)?;

    match command {
        BackupCommands::Create {
            no_uploads,
            output_dir,
        } => {
            let db = session.database()?;
            let options = BackupOptions {
                include_uploads: !no_uploads,
                output_dir,
            };

            let started = Instant::now();
            let bar = spinner("Creating backup...");
            let result = BackupEngine::new(&session.ctx)
                .create_backup(&session.root, &db, &options)
                .await;
            bar.finish_and_clear();

            if global.json {
                print_json(&result)?;
            } else if result.success {
                println!("{} Backup created in {}", "✓".green(), elapsed(started));
                if let Some(path) = &result.path {
                    println!("  Path:       {}", path.display());
                }
                println!("  Size:       {}", format_bytes(result.size));
                println!(
                    "  Components: database={} config={} uploads={}",
                    result.components.database, result.components.config, result.components.uploads
                );
            } else {
                println!(
                    "{} Backup failed: {}",
                    "✗".red(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
                if let Some(path) = &result.path {
                    println!("  Partial bundle kept at {}", path.display());
                }
            }
            Ok(result.success)
        }
        BackupCommands::List { all } => {
            let catalog = BackupCatalog::new(&session.ctx.settings);
            let entries = if all {
                catalog.list_all(&session.root)
            } else {
                catalog.list(&session.root)
            };

            if global.json {
                print_json(&entries)?;
                return Ok(true);
            }

            if entries.is_empty() {
                println!("No backups found in {}", session.ctx.settings.backups_path(&session.root).display());
                return Ok(true);
            }

            println!("{:<40} {:<22} {:<10} {:<10}", "Bundle", "Created", "Version", "Size");
            println!("{}", "-".repeat(84));
            for entry in entries {
                let name = entry
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let line = format!(
                    "{:<40} {:<22} {:<10} {:<10}",
                    name,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    entry.version,
                    format_bytes(entry.size)
                );
                if entry.status == BundleStatus::Complete {
                    println!("{}", line);
                } else {
                    println!("{} {}", line.dimmed(), "(incomplete)".yellow());
                }
            }
            Ok(true)
        }
        BackupCommands::Restore {
            bundle,
            skip_database,
            skip_config,
            skip_uploads,
        } => {
            let db = session.database()?;
            let options = RestoreOptions {
                restore_database: !skip_database,
                restore_config: !skip_config,
                restore_uploads: !skip_uploads,
            };

            let bar = spinner(&format!("Restoring {}...", bundle.display()));
            let result = RestoreEngine::new(&session.ctx)
                .restore(&bundle, &session.root, &db, &options)
                .await;
            bar.finish_and_clear();

            report_outcome(global, "Restore", &result)
        }
    }
}

async fn handle_upgrade(global: &GlobalArgs, check: bool, target: Option<String>, no_backup: bool) -> Result<bool> {
    let session = Session::open(global)?;

    if check {
        let info = session.ctx.versions().check_for_updates(&session.root).await;
        if global.json {
            print_json(&info)?;
        } else if info.update_available {
            println!(
                "{} Update available: {} -> {}",
                "↑".cyan(),
                info.current_version,
                info.latest_version.green()
            );
        } else {
            println!("{} Up to date ({})", "✓".green(), info.current_version);
        }
        return Ok(true);
    }

    let db = session.database()?;
    let bar = spinner("Preparing upgrade...");
    let progress = bar.clone();
    let options = UpgradeOptions {
        target_version: target,
        create_backup: !no_backup,
        on_progress: Some(Arc::new(move |message: &str| progress.set_message(message.to_string()))),
    };

    let started = Instant::now();
    let result = UpgradeOrchestrator::new(&session.ctx)
        .upgrade(&session.root, &db, &options)
        .await;
    bar.finish_and_clear();

    if global.json {
        print_json(&result)?;
    } else if !result.success {
        println!(
            "{} Upgrade failed: {}",
            "✗".red(),
            result.error.as_deref().unwrap_or("unknown error")
        );
        if let Some(path) = &result.backup_path {
            println!("\nTo roll back:");
            println!("  upkeep-cli rollback {}", path.display());
        }
    } else if result.completed_stages.len() == 1 {
        println!("{} Already up to date ({})", "✓".green(), result.from_version);
    } else {
        println!(
            "{} Upgraded {} -> {} in {}",
            "✓".green(),
            result.from_version,
            result.to_version.green(),
            elapsed(started)
        );
        println!("  Migrations applied: {}", result.migrations_run);
        if let Some(path) = &result.backup_path {
            println!("  Backup:             {}", path.display());
        }
    }

    Ok(result.success)
}

async fn handle_rollback(global: &GlobalArgs, bundle: Option<PathBuf>) -> Result<bool> {
    let session = Session::open(global)?;
    let db = session.database()?;

    let bundle = match bundle {
        Some(bundle) => bundle,
        None => latest_bundle(&session)?,
    };

    let bar = spinner(&format!("Rolling back to {}...", bundle.display()));
    let progress = bar.clone();
    let result = RollbackEngine::new(&session.ctx)
        .rollback(
            &bundle,
            &session.root,
            &db,
            Some(Arc::new(move |stage: &str| progress.set_message(stage.to_string()))),
        )
        .await;
    bar.finish_and_clear();

    report_outcome(global, "Rollback", &result)
}

fn latest_bundle(session: &Session) -> Result<PathBuf> {
    let backups = session.ctx.settings.backups_path(&session.root);
    BackupCatalog::new(&session.ctx.settings)
        .latest(&session.root)
        .map(|entry| entry.path)
        .with_context(|| format!("No complete backup found in {}", backups.display()))
}
