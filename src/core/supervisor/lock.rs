//! Advisory lock held while a supervisor owns a validator process.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use crate::error::{Result, ValmonError};

/// Released when dropped
#[derive(Debug)]
pub struct SupervisorLock {
    _file: File,
}

impl SupervisorLock {
    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ValmonError::io_at(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| ValmonError::io_at(path, e))?;

        if try_lock_exclusive(&file).map_err(|e| ValmonError::io_at(path, e))? {
            Ok(Some(Self { _file: file }))
        } else {
            Ok(None)
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)] // SAFETY: flock on a file descriptor we own
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

// No advisory locking elsewhere; the process record is the only guard.
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_reacquirable_after_drop() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let lock = SupervisorLock::try_acquire(&path).unwrap();
        assert!(lock.is_some());
        drop(lock);

        assert!(SupervisorLock::try_acquire(&path).unwrap().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_second_holder_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let _held = SupervisorLock::try_acquire(&path).unwrap().unwrap();
        assert!(SupervisorLock::try_acquire(&path).unwrap().is_none());
    }
}
