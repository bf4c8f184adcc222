//! Private or cross-process shared storage of a dataset.
//!
//! A [`SharedData`] owns the in-memory value of one dataset and knows where
//! it lives on disk. In private mode the file belongs to this instance and
//! is read and written without locking. In shared mode the canonical file
//! may be rewritten by sibling processes at any time: reads reload it when
//! the file changed since it was last seen, and updates run under the
//! reserved then exclusive lock described in [`lock`].
//!
//! A dataset whose file cannot be loaded at startup can be opened
//! [`unreadable`](SharedData::unreadable): it starts empty and refuses
//! writes until the file loads again, so the broken file is never
//! overwritten with partial data.

mod lock;

pub use lock::{write_atomic, DataLock, LockLevel, LockRetry};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;

/// On-disk representation of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Table,
    FastTable,
    Binary,
    /// Embedded database, outside of [`SharedData`]
    Sqlite,
}

/// A value that can be stored by [`SharedData`].
pub trait Dataset: Clone + Default {
    /// Name used in the `sharedData` setting and in logs
    const NAME: &'static str;
    const KIND: StorageKind;

    fn decode(content: &[u8]) -> Result<Self, String>;
    fn encode(&self) -> Result<Vec<u8>, String>;
}

#[derive(Debug, Clone)]
enum Storage {
    Private { path: PathBuf },
    Shared { path: PathBuf, observed: Option<FileStamp> },
}

/// Version of a data file as seen on disk. Every write renames a new file
/// into place, so the inode changes even when the modification time does
/// not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Result<Self, SyncError> {
        let io_error = |source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        };
        let meta = std::fs::metadata(path).map_err(io_error)?;
        Ok(Self {
            modified: meta.modified().map_err(io_error)?,
            len: meta.len(),
            #[cfg(unix)]
            dev: meta.dev(),
            #[cfg(unix)]
            ino: meta.ino(),
        })
    }
}

impl Storage {
    fn path(&self) -> &Path {
        match self {
            Storage::Private { path } | Storage::Shared { path, .. } => path,
        }
    }
}

/// Proof that the reserved lock of a dataset is held, returned by
/// [`SharedData::refresh_and_lock_for_update`]. Carries the dataset value as
/// it was when the lock was taken so a failed update can be rolled back.
#[derive(Debug)]
pub struct UpdateLock<D> {
    path: PathBuf,
    lock: Option<DataLock>,
    snapshot: D,
}

impl<D> UpdateLock<D> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub struct SharedData<D: Dataset> {
    data: D,
    storage: Storage,
    retry: LockRetry,
    unreadable: bool,
}

impl<D: Dataset> SharedData<D> {
    /// Opens instance-local storage, loading the file when it exists.
    pub fn private(path: &Path) -> Result<Self, SyncError> {
        let data = if path.exists() { load_file(path)? } else { D::default() };
        debug!(dataset = D::NAME, kind = ?D::KIND, path = %path.display(), "Using private storage");
        Ok(Self {
            data,
            storage: Storage::Private {
                path: path.to_path_buf(),
            },
            retry: LockRetry::default(),
            unreadable: false,
        })
    }

    /// Storage for a dataset whose file failed to load. The value starts
    /// empty; updates reload the file first and fail while it stays
    /// unreadable.
    pub fn unreadable(path: &Path, shared: bool, retry: LockRetry) -> Self {
        let path = path.to_path_buf();
        Self {
            data: D::default(),
            storage: if shared {
                Storage::Shared { path, observed: None }
            } else {
                Storage::Private { path }
            },
            retry,
            unreadable: true,
        }
    }

    /// Opens shared storage at `shared_path`.
    ///
    /// When the shared file does not exist yet it is created from the
    /// private file at `private_path` (or empty), unless a sibling process
    /// creates it first, in which case that file is loaded instead.
    pub fn shared(shared_path: &Path, private_path: Option<&Path>, retry: LockRetry) -> Result<Self, SyncError> {
        let mut this = Self {
            data: D::default(),
            storage: Storage::Shared {
                path: shared_path.to_path_buf(),
                observed: None,
            },
            retry,
            unreadable: false,
        };

        if shared_path.exists() {
            let _lock = DataLock::acquire(shared_path, LockLevel::Shared, &this.retry)?;
            this.reload()?;
            debug!(dataset = D::NAME, kind = ?D::KIND, path = %shared_path.display(), "Loaded shared storage");
            return Ok(this);
        }

        let mut lock = DataLock::acquire(shared_path, LockLevel::Reserved, &this.retry)?;
        if shared_path.exists() {
            this.reload()?;
            debug!(dataset = D::NAME, "Shared storage created concurrently, loaded it");
            return Ok(this);
        }

        lock.upgrade(&this.retry)?;
        this.data = match private_path.filter(|p| p.exists()) {
            Some(private) => {
                info!(dataset = D::NAME, from = %private.display(), to = %shared_path.display(), "Initializing shared storage from private file");
                load_file(private)?
            }
            None => {
                info!(dataset = D::NAME, path = %shared_path.display(), "Creating empty shared storage");
                D::default()
            }
        };
        this.store()?;
        Ok(this)
    }

    pub fn with_retry(mut self, retry: LockRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Current in-memory value, without checking the file.
    pub fn get(&self) -> &D {
        &self.data
    }

    /// Current value after a staleness check. A failed refresh is logged
    /// and the last good value is returned.
    pub fn read(&mut self) -> &D {
        if let Err(e) = self.refresh_if_stale() {
            error!(dataset = D::NAME, error = %e, "Unable to refresh shared data, using cached value");
        }
        &self.data
    }

    /// Mutable access for callers holding an [`UpdateLock`].
    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.storage, Storage::Shared { .. })
    }

    /// False while the file could not be loaded.
    pub fn is_readable(&self) -> bool {
        !self.unreadable
    }

    /// Reloads the shared file under a shared lock when it changed since
    /// the last observation, or any unreadable file. Returns whether a
    /// reload happened.
    pub fn refresh_if_stale(&mut self) -> Result<bool, SyncError> {
        if !self.unreadable && !self.is_stale()? {
            return Ok(false);
        }
        let _lock = match &self.storage {
            Storage::Private { .. } => None,
            Storage::Shared { path, .. } => Some(DataLock::acquire(path, LockLevel::Shared, &self.retry)?),
        };
        self.reload()?;
        debug!(dataset = D::NAME, "Reloaded stale shared data");
        Ok(true)
    }

    /// Takes the reserved lock and reloads the data when stale. On failure
    /// the dataset is left untouched. An unreadable dataset is reloaded
    /// first and stays locked out while the file still fails to load.
    pub fn refresh_and_lock_for_update(&mut self) -> Result<UpdateLock<D>, SyncError> {
        let lock = match &self.storage {
            Storage::Private { .. } => None,
            Storage::Shared { path, .. } => Some(DataLock::acquire(path, LockLevel::Reserved, &self.retry)?),
        };
        if self.unreadable || (lock.is_some() && self.is_stale()?) {
            self.reload()?;
        }
        Ok(UpdateLock {
            path: self.path().to_path_buf(),
            lock,
            snapshot: self.data.clone(),
        })
    }

    /// Writes the dataset and releases `lock`.
    ///
    /// A lock taken on another dataset is refused and logged; a failure to
    /// upgrade or write restores the value captured when the lock was taken.
    pub fn update_and_unlock(&mut self, lock: UpdateLock<D>) -> Result<(), SyncError> {
        if lock.path != self.path() {
            error!(
                dataset = D::NAME,
                expected = %self.path().display(),
                got = %lock.path.display(),
                "Update attempted with a lock on another dataset"
            );
            return Err(SyncError::NotLocked(self.path().to_path_buf()));
        }

        let UpdateLock { lock, snapshot, .. } = lock;
        let result = match lock {
            Some(mut held) => match held.upgrade(&self.retry) {
                Ok(()) => self.store(),
                Err(e) => Err(e),
            },
            None => self.store(),
        };

        if let Err(e) = &result {
            warn!(dataset = D::NAME, kind = ?D::KIND, error = %e, "Update aborted, restoring previous data");
            self.data = snapshot;
        }
        result
    }

    /// Releases `lock` without writing and restores the locked snapshot.
    pub fn abandon_update(&mut self, lock: UpdateLock<D>) {
        if lock.path == self.path() {
            self.data = lock.snapshot;
        }
    }

    /// Locks, applies `f` to the data and writes it back.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut D) -> R) -> Result<R, SyncError> {
        let lock = self.refresh_and_lock_for_update()?;
        let result = f(&mut self.data);
        self.update_and_unlock(lock)?;
        Ok(result)
    }

    fn is_stale(&self) -> Result<bool, SyncError> {
        match &self.storage {
            Storage::Private { .. } => Ok(false),
            Storage::Shared { path, observed: Some(seen) } => Ok(FileStamp::of(path)? != *seen),
            Storage::Shared { path, observed: None } => Ok(path.exists()),
        }
    }

    fn reload(&mut self) -> Result<(), SyncError> {
        let path = self.path().to_path_buf();
        if self.unreadable && !path.exists() {
            // the broken file is gone, nothing left to protect
            self.data = D::default();
        } else {
            self.data = load_file(&path)?;
            let stamp = FileStamp::of(&path)?;
            if let Storage::Shared { observed, .. } = &mut self.storage {
                *observed = Some(stamp);
            }
        }
        if std::mem::take(&mut self.unreadable) {
            info!(dataset = D::NAME, path = %path.display(), "Dataset loaded again, updates enabled");
        }
        Ok(())
    }

    fn store(&mut self) -> Result<(), SyncError> {
        let content = self.data.encode().map_err(|reason| SyncError::Encode { name: D::NAME, reason })?;
        let path = self.path().to_path_buf();
        write_atomic(&path, &content)?;
        if let Storage::Shared { observed, .. } = &mut self.storage {
            *observed = Some(FileStamp::of(&path)?);
        }
        Ok(())
    }
}

fn load_file<D: Dataset>(path: &Path) -> Result<D, SyncError> {
    let content = std::fs::read(path).map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    D::decode(&content).map_err(|reason| SyncError::Decode {
        path: path.to_path_buf(),
        reason,
    })
}

/// Encodes a value as deflate-compressed JSON.
pub fn encode_binary<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    let json = serde_json::to_vec(value).map_err(|e| format!("Serialization failed: {e}"))?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| format!("Compression failed: {e}"))?;
    encoder
        .finish()
        .map_err(|e| format!("Compression finalization failed: {e}"))
}

/// Decodes a value written by [`encode_binary`]. An empty input decodes to
/// the default value.
pub fn decode_binary<T: DeserializeOwned + Default>(content: &[u8]) -> Result<T, String> {
    if content.is_empty() {
        return Ok(T::default());
    }
    let mut decoder = DeflateDecoder::new(content);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| format!("Decompression failed: {e}"))?;
    serde_json::from_slice(&json).map_err(|e| format!("Deserialization failed: {e}"))
}

/// Decodes UTF-8 text content of table-based datasets.
pub fn decode_text(content: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(content).map_err(|e| format!("Invalid UTF-8: {e}"))
}
