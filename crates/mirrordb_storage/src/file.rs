//! File-based storage backend for persistent storage.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A single-file storage backend.
///
/// The image is kept in one file. Each [`store`](StorageBackend::store)
/// writes a sibling temporary file, syncs it and renames it over the
/// image, so a crash leaves either the old or the new image in place.
///
/// An exclusive advisory lock on `<path>.lock` is held for the lifetime
/// of the backend. Opening the same file twice fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use mirrordb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("main.mdb")).unwrap();
/// backend.store(b"persistent image").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    lock_file: Option<File>,
    sync_on_store: bool,
}

impl FileBackend {
    /// Opens a file backend at the given path, creating parent directories
    /// as needed. The image file itself is only created by the first store.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be acquired or the directories
    /// cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = Self::lock_path(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_file: Some(lock_file),
            sync_on_store: true,
        })
    }

    /// Controls whether each store is synced to disk before the rename.
    #[must_use]
    pub fn with_sync(mut self, sync_on_store: bool) -> Self {
        self.sync_on_store = sync_on_store;
        self
    }

    /// Returns the path to the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if an image file exists at `path`.
    #[must_use]
    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl StorageBackend for FileBackend {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        if self.lock_file.is_none() {
            return Err(StorageError::Closed);
        }
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&mut self, image: &[u8]) -> StorageResult<()> {
        if self.lock_file.is_none() {
            return Err(StorageError::Closed);
        }
        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(image)?;
            if self.sync_on_store {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn size(&self) -> u64 {
        fs::metadata(&self.path).map_or(0, |m| m.len())
    }

    fn destroy(&mut self) -> StorageResult<()> {
        let lock_path = Self::lock_path(&self.path);
        if let Some(lock) = self.lock_file.take() {
            let _ = lock.unlock();
        }
        for path in [self.path.clone(), self.temp_path(), lock_path] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Some(lock) = self.lock_file.take() {
            let _ = lock.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_loads_none() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("db.mdb")).unwrap();
        assert!(backend.load().unwrap().is_none());
        assert_eq!(backend.size(), 0);
    }

    #[test]
    fn store_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.mdb");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.store(b"image one").unwrap();
            backend.store(b"image two").unwrap();
        }
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.load().unwrap().unwrap(), b"image two");
        assert!(FileBackend::exists(&path));
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.mdb");
        let _first = FileBackend::open(&path).unwrap();
        let second = FileBackend::open(&path);
        assert!(matches!(second, Err(StorageError::Locked(_))));
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("db.mdb");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.store(b"x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn destroy_removes_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.mdb");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.store(b"gone soon").unwrap();
        backend.destroy().unwrap();
        assert!(!path.exists());
        assert!(matches!(backend.load(), Err(StorageError::Closed)));
        // lock released, can reopen
        let reopened = FileBackend::open(&path).unwrap();
        assert!(reopened.load().unwrap().is_none());
    }
}
