//! Advisory file locks guarding a shared data file.
//!
//! Three levels are exposed, built on two lock files next to the data file:
//!
//! | level       | `<file>.rsv` | `<file>.lock` |
//! |-------------|--------------|---------------|
//! | `Shared`    | -            | shared        |
//! | `Reserved`  | exclusive    | shared        |
//! | `Exclusive` | exclusive    | exclusive     |
//!
//! Holding the reserve file marks write intent: readers keep going while at
//! most one process prepares an update.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    Shared,
    Reserved,
    Exclusive,
}

/// How lock acquisition waits for a busy lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    /// Non-blocking attempts before giving up (ignored when blocking)
    pub attempts: u32,
    pub delay: Duration,
    /// Block the thread until the lock is granted
    pub blocking: bool,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: constants::lock::RETRY_ATTEMPTS,
            delay: constants::lock::RETRY_DELAY,
            blocking: false,
        }
    }
}

/// A held lock on a data file. Released on drop.
#[derive(Debug)]
pub struct DataLock {
    data_path: PathBuf,
    level: LockLevel,
    lock_file: File,
    reserve_file: Option<File>,
}

impl DataLock {
    /// Acquires `level` on the data file at `data_path`.
    pub fn acquire(data_path: &Path, level: LockLevel, retry: &LockRetry) -> Result<Self, SyncError> {
        let reserve_file = if level >= LockLevel::Reserved {
            let file = open_lock_file(&companion(data_path, "rsv"))?;
            take(&file, true, retry, data_path, level)?;
            Some(file)
        } else {
            None
        };

        let lock_file = open_lock_file(&companion(data_path, "lock"))?;
        take(&lock_file, level == LockLevel::Exclusive, retry, data_path, level)?;

        debug!(path = %data_path.display(), level = ?level, "Lock acquired");
        Ok(Self {
            data_path: data_path.to_path_buf(),
            level,
            lock_file,
            reserve_file,
        })
    }

    /// Upgrades a reserved lock to exclusive, waiting for readers to leave.
    pub fn upgrade(&mut self, retry: &LockRetry) -> Result<(), SyncError> {
        match self.level {
            LockLevel::Exclusive => Ok(()),
            LockLevel::Shared => Err(SyncError::LockFailed {
                path: self.data_path.clone(),
                level: LockLevel::Exclusive,
            }),
            LockLevel::Reserved => {
                take(&self.lock_file, true, retry, &self.data_path, LockLevel::Exclusive)?;
                self.level = LockLevel::Exclusive;
                Ok(())
            }
        }
    }

    pub fn level(&self) -> LockLevel {
        self.level
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
}

impl Drop for DataLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
        if let Some(reserve) = &self.reserve_file {
            let _ = FileExt::unlock(reserve);
        }
    }
}

fn companion(data_path: &Path, extension: &str) -> PathBuf {
    let mut name = data_path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn open_lock_file(path: &Path) -> Result<File, SyncError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn take(file: &File, exclusive: bool, retry: &LockRetry, data_path: &Path, level: LockLevel) -> Result<(), SyncError> {
    let failed = || SyncError::LockFailed {
        path: data_path.to_path_buf(),
        level,
    };

    if retry.blocking {
        let result = if exclusive {
            FileExt::lock_exclusive(file)
        } else {
            FileExt::lock_shared(file)
        };
        return result.map_err(|e| {
            warn!(path = %data_path.display(), error = %e, "Blocking lock failed");
            failed()
        });
    }

    let attempts = retry.attempts.max(1);
    for attempt in 1..=attempts {
        let result = if exclusive {
            FileExt::try_lock_exclusive(file)
        } else {
            FileExt::try_lock_shared(file)
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                if attempt < attempts {
                    thread::sleep(retry.delay);
                }
            }
            Err(e) => {
                warn!(path = %data_path.display(), error = %e, "Lock attempt failed");
                return Err(failed());
            }
        }
    }

    warn!(path = %data_path.display(), level = ?level, attempts, "Lock still busy, giving up");
    Err(failed())
}

/// Replaces `path` atomically: the content goes to a temporary file in the
/// same directory which is then renamed over the target.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), SyncError> {
    let io_error = |source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    };
    let tmp_path = companion(path, &format!("tmp{}", std::process::id()));

    let mut file = File::create(&tmp_path).map_err(io_error)?;
    let written = file.write_all(content).and_then(|_| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_error(e));
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        io_error(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> LockRetry {
        LockRetry {
            attempts: 2,
            delay: Duration::from_millis(5),
            blocking: false,
        }
    }

    #[test]
    fn test_readers_share() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bans.dat");
        let first = DataLock::acquire(&path, LockLevel::Shared, &quick()).unwrap();
        let second = DataLock::acquire(&path, LockLevel::Shared, &quick()).unwrap();
        assert_eq!(first.level(), LockLevel::Shared);
        assert_eq!(second.data_path(), path.as_path());
    }

    #[test]
    fn test_single_reserved_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bans.dat");
        let reserved = DataLock::acquire(&path, LockLevel::Reserved, &quick()).unwrap();

        // readers still get in, a second writer does not
        assert!(DataLock::acquire(&path, LockLevel::Shared, &quick()).is_ok());
        let err = DataLock::acquire(&path, LockLevel::Reserved, &quick()).unwrap_err();
        assert!(matches!(err, SyncError::LockFailed { level: LockLevel::Reserved, .. }));

        drop(reserved);
        assert!(DataLock::acquire(&path, LockLevel::Reserved, &quick()).is_ok());
    }

    #[test]
    fn test_upgrade_waits_for_readers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bans.dat");
        let mut writer = DataLock::acquire(&path, LockLevel::Reserved, &quick()).unwrap();
        let reader = DataLock::acquire(&path, LockLevel::Shared, &quick()).unwrap();

        assert!(writer.upgrade(&quick()).is_err());
        assert_eq!(writer.level(), LockLevel::Reserved);

        drop(reader);
        writer.upgrade(&quick()).unwrap();
        assert_eq!(writer.level(), LockLevel::Exclusive);
        assert!(DataLock::acquire(&path, LockLevel::Shared, &quick()).is_err());
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.dat");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
