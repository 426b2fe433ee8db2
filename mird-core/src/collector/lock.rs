//! Advisory file locks for collector appends.
//!
//! Lock strategy:
//! - `<data_file>.lock` serializes rotation and appends on the main log.
//! - session logs are locked on the log file itself.
//! - Locks are blocking OS file locks (flock) held only for one write.
//!
//! flock locks belong to the open file description, so two handles opened
//! by the same process exclude each other just like two processes do.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// An exclusive lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Blocks until an exclusive lock on `path` is held, creating the file if needed.
    pub fn exclusive(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        lock_file(&file)?;
        Ok(Self { file })
    }

    /// Locks an already opened file.
    pub fn on(file: File) -> io::Result<Self> {
        lock_file(&file)?;
        Ok(Self { file })
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
    }
}

/// Sidecar lock path guarding a log file
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(unix)]
fn lock_file(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    let fd = file.as_raw_fd();
    loop {
        // SAFETY: flock is called with a valid file descriptor and constant flags.
        let rc = unsafe { flock(fd, LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("mird collector file locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/srv/analytics_data.json")),
            PathBuf::from("/srv/analytics_data.json.lock")
        );
    }

    #[test]
    fn test_lock_excludes_second_holder_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.lock");

        let first = FileLock::exclusive(&path).unwrap();
        let (tx, rx) = mpsc::channel();
        let contender_path = path.clone();
        let handle = std::thread::spawn(move || {
            let _second = FileLock::exclusive(&contender_path).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
