/// CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

pub fn get_version() -> &'static str {
    VERSION_WITH_BUILD
}

#[derive(Parser)]
#[command(name = "upkeep-cli")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Deployment root directory
    #[arg(long, global = true, env = "UPKEEP_ROOT")]
    pub root: Option<PathBuf>,

    /// Settings file (defaults to <root>/upkeep.toml, then the user config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Backup operations
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// Upgrade the deployment to a newer release
    Upgrade {
        /// Only report whether an update is available
        #[arg(short, long)]
        check: bool,

        /// Target version (defaults to the latest release)
        #[arg(short, long)]
        target: Option<String>,

        /// Do not take a backup first
        #[arg(long)]
        no_backup: bool,
    },

    /// Restore a backup and restart services
    Rollback {
        /// Bundle directory (defaults to the newest complete backup)
        bundle: Option<PathBuf>,
    },

    /// Show the installed version
    Version {
        /// Also query the latest published release
        #[arg(short, long)]
        latest: bool,
    },

    /// Compare two versions (prints -1, 0 or 1)
    Compare { a: String, b: String },
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Create a backup bundle
    Create {
        /// Leave the uploads directory out
        #[arg(long)]
        no_uploads: bool,

        /// Directory receiving the bundle
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// List backups, newest first
    List {
        /// Include incomplete bundles
        #[arg(short, long)]
        all: bool,
    },

    /// Restore from a backup bundle
    Restore {
        bundle: PathBuf,

        #[arg(long)]
        skip_database: bool,

        #[arg(long)]
        skip_config: bool,

        #[arg(long)]
        skip_uploads: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_restore() {
        let cli = Cli::try_parse_from([
            "upkeep-cli",
            "--root",
            "/srv/mall",
            "backup",
            "restore",
            "/srv/mall/backups/backup-2026-10-16T12-00-00Z",
            "--skip-uploads",
        ])
        .unwrap();

        assert_eq!(cli.global.root, Some(PathBuf::from("/srv/mall")));
        match cli.command {
            Commands::Backup {
                command:
                    BackupCommands::Restore {
                        skip_uploads,
                        skip_database,
                        ..
                    },
            } => {
                assert!(skip_uploads);
                assert!(!skip_database);
            }
            _ => panic!("expected backup restore"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["upkeep-cli", "upgrade", "--check", "-vv", "--json"]).unwrap();
        assert_eq!(cli.global.verbose, 2);
        assert!(cli.global.json);
        assert!(matches!(cli.command, Commands::Upgrade { check: true, .. }));
    }
}
