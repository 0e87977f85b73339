/// Error taxonomy shared by the backup, restore, upgrade and rollback engines
///
/// Engines convert these into human-readable strings on their result types;
/// nothing here escapes a public operation as a raw `Err`.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::manifest::Component;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("required tool `{tool}` is not installed or not on PATH")]
    ToolingMissing { tool: String },

    #[error("database is unreachable or rejected the credentials: {0}")]
    Connectivity(String),

    #[error("{component} backup failed: {reason}")]
    BackupComponent { component: Component, reason: String },

    #[error("backup bundle {} is not restorable: {reason}", .path.display())]
    RestoreIntegrity { path: PathBuf, reason: String },

    #[error("{stage} failed: {reason}")]
    UpgradeStep { stage: String, reason: String },

    #[error("{stage} failed: {reason}")]
    RollbackStep { stage: String, reason: String },

    #[error("restore failed after services were stopped, services left down: {0}")]
    RollbackOrdering(String),

    #[error("deployment at {} is locked by another operation", .0.display())]
    Locked(PathBuf),

    #[error("`{program}` exited with {}: {stderr}", exit_label(.code))]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl OpsError {
    pub fn upgrade_step(stage: impl ToString, source: impl std::fmt::Display) -> Self {
        OpsError::UpgradeStep {
            stage: stage.to_string(),
            reason: source.to_string(),
        }
    }

    pub fn rollback_step(stage: impl ToString, source: impl std::fmt::Display) -> Self {
        OpsError::RollbackStep {
            stage: stage.to_string(),
            reason: source.to_string(),
        }
    }

    pub fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        OpsError::RestoreIntegrity {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Render an error with its full cause chain for result structs
pub fn describe(err: &OpsError) -> String {
    match err {
        OpsError::Other(inner) => format!("{:#}", inner),
        other => other.to_string(),
    }
}
