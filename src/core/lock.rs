/// Advisory lock around a deployment root
///
/// Held for the duration of a backup, restore, upgrade or rollback so two
/// operations never race on the same tree. Released when dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::error::OpsError;
use crate::utils::LOCK_FILE;

#[derive(Debug)]
pub struct DeploymentLock {
    file: File,
    path: PathBuf,
}

impl DeploymentLock {
    /// Take the exclusive lock without blocking; contention is `OpsError::Locked`
    pub fn acquire(root: &Path) -> Result<Self, OpsError> {
        let path = root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            // the holder's PID must survive a contended open
            .truncate(false)
            .open(&path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
                let err = std::io::Error::last_os_error();
                return Err(match err.kind() {
                    std::io::ErrorKind::WouldBlock => OpsError::Locked(root.to_path_buf()),
                    _ => OpsError::Io(err),
                });
            }
        }

        file.set_len(0)?;
        let mut writer = &file;
        let _ = writer.write_all(std::process::id().to_string().as_bytes());
        let _ = writer.flush();

        tracing::debug!(path = %path.display(), "deployment lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeploymentLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            if unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) } != 0 {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %std::io::Error::last_os_error(),
                    "deployment lock not released, closing the descriptor instead"
                );
                return;
            }
        }
        tracing::debug!(path = %self.path.display(), "deployment lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_second_acquire_is_rejected() {
        let dir = TempDir::new().unwrap();
        let lock = DeploymentLock::acquire(dir.path()).unwrap();
        assert!(lock.path().ends_with(".upkeep.lock"));

        let err = DeploymentLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, OpsError::Locked(_)));

        drop(lock);
        assert!(DeploymentLock::acquire(dir.path()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_file_records_holder_pid() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "999999999").unwrap();

        let lock = DeploymentLock::acquire(dir.path()).unwrap();
        let recorded = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(recorded, std::process::id().to_string());
    }
}
