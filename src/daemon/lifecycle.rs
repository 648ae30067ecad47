// daemon/lifecycle.rs - PID-file singleton lock.
//
// The lock is an OS advisory file lock (`flock` on unix, via `fs2`), not a
// PID comparison: a process that dies without cleaning up releases the lock
// automatically, so a fresh daemon can always tell a stale PID file apart
// from a live one by simply trying to acquire it. Grounded on the
// lock-file-held-for-the-process-lifetime pattern in the oddjobs daemon's
// lifecycle module (`lock_file: File` held in `DaemonState`, released on
// drop).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::Result;

/// Holds the exclusive lock on the daemon's PID file for the lifetime of
/// the process. Dropping it releases the lock and removes the file.
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Try to become the singleton daemon. Returns `Ok(None)` if another
    /// live process already holds the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).read(true).write(true).open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path: path.to_path_buf() })),
            Err(_) => Ok(None),
        }
    }

    pub fn write_pid(&mut self, pid: u32) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        write!(self.file, "{pid}")?;
        self.file.flush()?;
        Ok(())
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Whether some live process currently holds the PID lock at `path`.
///
/// This is the authoritative liveness check: a hung-but-alive daemon still
/// legitimately holds the lock, while a crashed one releases it the moment
/// the OS reaps the process, lock file contents notwithstanding.
pub fn is_held(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Ok(false)
        }
        Err(_) => Ok(true),
    }
}

/// Best-effort read of the pid recorded in the PID file, for display only.
pub fn read_pid(path: &Path) -> Option<u32> {
    let mut s = String::new();
    File::open(path).ok()?.read_to_string(&mut s).ok()?;
    s.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_leaves_no_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        assert!(!is_held(&path).unwrap());
        let mut lock = PidLock::try_acquire(&path).unwrap().expect("should acquire");
        lock.write_pid(4242).unwrap();
        assert!(is_held(&path).unwrap());
        assert_eq!(read_pid(&path), Some(4242));

        drop(lock);
        assert!(!path.exists());
        assert!(!is_held(&path).unwrap());
    }

    #[test]
    fn second_acquire_while_first_is_live_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        let _first = PidLock::try_acquire(&path).unwrap().expect("first acquires");
        let second = PidLock::try_acquire(&path).unwrap();
        assert!(second.is_none());
    }
}
