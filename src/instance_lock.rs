use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Exclusive per-host run lock.
///
/// Two pipeline instances pointed at the same database would double-write
/// every live table, so the service refuses to start while another instance
/// holds the lock. The lock releases automatically when the process exits,
/// cleanly or not.
pub struct InstanceLock {
    lock_file: File,
    lock_path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(name: &str) -> Result<Self> {
        let lock_path = Self::lock_path(name);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    anyhow::bail!(
                        "Another instance is already running (lock file {})",
                        lock_path.display()
                    );
                }
                return Err(err).context("Failed to acquire instance lock");
            }
        }

        #[cfg(not(unix))]
        {
            // No flock outside Unix; the PID file below is advisory only.
        }

        let mut pid_writer = lock_file.try_clone().context("Failed to clone lock handle")?;
        writeln!(pid_writer, "{}", std::process::id())
            .context("Failed to write PID to lock file")?;

        info!("Acquired instance lock at {}", lock_path.display());
        Ok(Self {
            lock_file,
            lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    fn lock_path(name: &str) -> PathBuf {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir());
        runtime_dir.join(format!("{}.lock", name))
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_second_acquisition_fails_while_held() {
        let first = InstanceLock::acquire("vatstats-lock-test").unwrap();
        assert!(InstanceLock::acquire("vatstats-lock-test").is_err());
        drop(first);
        let reacquired = InstanceLock::acquire("vatstats-lock-test").unwrap();
        assert!(reacquired.path().exists());
    }
}
