pub mod backup;
pub mod catalog;
pub mod context;
pub mod database;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod release;
pub mod restore;
pub mod rollback;
pub mod runner;
pub mod supervisor;
pub mod toolchain;
pub mod upgrade;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

pub use backup::{BackupEngine, BackupOptions, BackupResult};
pub use catalog::{BackupCatalog, BackupEntry};
pub use context::OpsContext;
pub use database::{DatabaseConfig, DatabaseEngine};
pub use error::OpsError;
pub use restore::{OperationResult, RestoreEngine, RestoreOptions};
pub use rollback::RollbackEngine;
pub use upgrade::{UpgradeOptions, UpgradeOrchestrator, UpgradeResult, UpgradeStage};
pub use version::{compare_versions, VersionResolver};
