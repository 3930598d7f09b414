//! File-based exclusive lock.
//!
//! Serializes per-identity vault writes across threads and processes: two
//! racing "create on first use" writers for the same key id must never both
//! generate a keypair. Uses `flock` on Unix and `LockFileEx` on Windows.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use crate::error::VaultError;

/// An exclusive lock backed by a file on disk.
#[derive(Debug, Clone)]
pub struct FileLock {
    file: Arc<File>,
}

/// Guard holding the exclusive lock; released on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    file: Arc<File>,
}

impl FileLock {
    /// Opens or creates the lock file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> Result<Self, VaultError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| VaultError::Lock(err.to_string()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|err| VaultError::Lock(err.to_string()))?;
        Ok(Self {
            file: Arc::new(file),
        })
    }

    /// Blocks until the exclusive lock is held.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired.
    pub fn lock(&self) -> Result<FileLockGuard, VaultError> {
        sys::acquire(&self.file, true)
            .map_err(|err| VaultError::Lock(err.to_string()))?;
        Ok(FileLockGuard {
            file: Arc::clone(&self.file),
        })
    }

    /// Attempts to take the lock without blocking; `None` when another
    /// holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error for failures other than the lock being held.
    pub fn try_lock(&self) -> Result<Option<FileLockGuard>, VaultError> {
        match sys::acquire(&self.file, false) {
            Ok(()) => Ok(Some(FileLockGuard {
                file: Arc::clone(&self.file),
            })),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(VaultError::Lock(err.to_string())),
        }
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = sys::release(&self.file);
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::os::raw::c_int;
    use std::os::unix::io::AsRawFd;

    const LOCK_EX: c_int = 2;
    const LOCK_NB: c_int = 4;
    const LOCK_UN: c_int = 8;

    extern "C" {
        fn flock(fd: c_int, operation: c_int) -> c_int;
    }

    pub fn acquire(file: &File, block: bool) -> std::io::Result<()> {
        let operation = if block { LOCK_EX } else { LOCK_EX | LOCK_NB };
        let result = unsafe { flock(file.as_raw_fd(), operation) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }

    pub fn release(file: &File) -> std::io::Result<()> {
        let result = unsafe { flock(file.as_raw_fd(), LOCK_UN) };
        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::os::windows::io::AsRawHandle;

    type Handle = *mut std::ffi::c_void;

    #[repr(C)]
    struct Overlapped {
        internal: usize,
        internal_high: usize,
        offset: u32,
        offset_high: u32,
        h_event: Handle,
    }

    const LOCKFILE_EXCLUSIVE_LOCK: u32 = 0x2;
    const LOCKFILE_FAIL_IMMEDIATELY: u32 = 0x1;
    const ERROR_LOCK_VIOLATION: i32 = 33;

    extern "system" {
        fn LockFileEx(
            h_file: Handle,
            flags: u32,
            reserved: u32,
            bytes_to_lock_low: u32,
            bytes_to_lock_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
        fn UnlockFileEx(
            h_file: Handle,
            reserved: u32,
            bytes_to_unlock_low: u32,
            bytes_to_unlock_high: u32,
            overlapped: *mut Overlapped,
        ) -> i32;
    }

    pub fn acquire(file: &File, block: bool) -> std::io::Result<()> {
        let flags = if block {
            LOCKFILE_EXCLUSIVE_LOCK
        } else {
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY
        };
        let mut overlapped: Overlapped = unsafe { std::mem::zeroed() };
        let result = unsafe {
            LockFileEx(file.as_raw_handle().cast(), flags, 0, 1, 0, &mut overlapped)
        };
        if result != 0 {
            Ok(())
        } else {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION) {
                Err(std::io::Error::from(std::io::ErrorKind::WouldBlock))
            } else {
                Err(err)
            }
        }
    }

    pub fn release(file: &File) -> std::io::Result<()> {
        let mut overlapped: Overlapped = unsafe { std::mem::zeroed() };
        let result =
            unsafe { UnlockFileEx(file.as_raw_handle().cast(), 0, 1, 0, &mut overlapped) };
        if result != 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vault.lock");

        let lock_a = FileLock::open(&path).expect("open lock");
        let guard = lock_a.lock().expect("acquire lock");

        let lock_b = FileLock::open(&path).expect("open lock");
        assert!(lock_b.try_lock().expect("try lock").is_none());

        drop(guard);
        assert!(lock_b.try_lock().expect("try lock").is_some());
    }

    #[test]
    fn test_lock_serializes_across_threads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vault.lock");
        let lock = FileLock::open(&path).expect("open lock");

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();

        let thread = std::thread::spawn(move || {
            let guard = lock.lock().expect("lock in thread");
            locked_tx.send(()).expect("signal locked");
            release_rx.recv().expect("wait release");
            drop(guard);
        });

        locked_rx.recv().expect("wait locked");
        let lock_b = FileLock::open(&path).expect("open lock");
        assert!(lock_b.try_lock().expect("try lock").is_none());

        release_tx.send(()).expect("release");
        thread.join().expect("thread join");

        assert!(lock_b.try_lock().expect("try lock").is_some());
    }
}
