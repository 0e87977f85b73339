/// Fixed names of deployment files and backup bundle entries

/// Environment file holding secrets; never overwritten by a release payload
pub const ENV_FILE: &str = ".env";

/// Package manifest declaring the installed application version
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Fallback plain-text version file
pub const VERSION_FILE: &str = "VERSION";

/// Configuration artifacts captured by a backup, in snapshot order
pub const CONFIG_ARTIFACTS: &[&str] = &[ENV_FILE, "ecosystem.config.js", "docker-compose.yml"];

/// Markers used to recognise a deployment root
pub const ROOT_MARKERS: &[&str] = &[ENV_FILE, "docker-compose.yml", "ecosystem.config.js"];

pub const DEFAULT_BACKUPS_DIR: &str = "backups";
pub const DEFAULT_UPLOADS_DIR: &str = "uploads";

/// Advisory lock file guarding the deployment root
pub const LOCK_FILE: &str = ".upkeep.lock";

/// Per-deployment settings file
pub const SETTINGS_FILE: &str = "upkeep.toml";

// Bundle layout
pub const BUNDLE_PREFIX: &str = "backup-";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const DATABASE_DUMP_FILE: &str = "database.dump.gz";
pub const CONFIG_SNAPSHOT_DIR: &str = "config";
pub const UPLOADS_SNAPSHOT_DIR: &str = "uploads";

/// Release artifact name inside the scoped download directory
pub const RELEASE_ARTIFACT: &str = "release.tar.gz";
