//! On-disk layout.
//!
//! ```text
//! <base>/Library/
//! ├─ Database/
//! │  ├─ LOCK             # Advisory lock, one process at a time
//! │  ├─ wal.log          # Committed batches since the last checkpoint
//! │  ├─ CHECKPOINT       # Full key/value image at a sequence number
//! │  └─ CHECKPOINT.tmp   # Image being written
//! ├─ Photos/             # Local photo files (photo storage collaborator)
//! └─ ServerPhotos/       # Files downloaded from the server
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const CHECKPOINT_FILE: &str = "CHECKPOINT";
const CHECKPOINT_TEMP: &str = "CHECKPOINT.tmp";

/// Directories owned by one application install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    /// Root directory handed in by the host.
    pub base: PathBuf,
    /// `<base>/Library`.
    pub library: PathBuf,
    /// `<base>/Library/Database`.
    pub database: PathBuf,
    /// `<base>/Library/Photos`.
    pub photos: PathBuf,
    /// `<base>/Library/ServerPhotos`.
    pub server_photos: PathBuf,
}

impl AppDirs {
    /// Computes the layout under `base` without touching the filesystem.
    #[must_use]
    pub fn new(base: &Path) -> Self {
        let library = base.join("Library");
        Self {
            base: base.to_path_buf(),
            database: library.join("Database"),
            photos: library.join("Photos"),
            server_photos: library.join("ServerPhotos"),
            library,
        }
    }

    /// Creates every directory of the layout.
    pub fn create_all(&self) -> CoreResult<()> {
        for dir in [&self.database, &self.photos, &self.server_photos] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Empties the database directory, forcing a full resync from the server.
    ///
    /// Takes the directory lock first and deletes everything but `LOCK`
    /// while holding it. Photo directories are left alone; the photo
    /// collaborator owns them.
    ///
    /// # Errors
    ///
    /// `DatabaseLocked` if an open store holds the directory.
    pub fn wipe_database(&self) -> CoreResult<()> {
        if !self.database.exists() {
            return Ok(());
        }
        let dir = DatabaseDir::open(&self.database, false)?;
        dir.clear()
    }
}

/// A locked database directory.
///
/// Holds an exclusive `fs2` lock on `LOCK` for its lifetime, so only one
/// `DatabaseDir` can exist per directory across processes.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory and takes its lock.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if the directory is missing and `create_if_missing` is false
    /// - `DatabaseLocked` if another handle holds the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_operation(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the WAL file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Returns the path to the checkpoint image.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.path.join(CHECKPOINT_FILE)
    }

    /// Returns true if neither a WAL nor a checkpoint image exists yet.
    #[must_use]
    pub fn is_new_database(&self) -> bool {
        !self.checkpoint_path().exists() && !self.wal_path().exists()
    }

    /// Reads the checkpoint image, if one has been written.
    pub fn load_checkpoint(&self) -> CoreResult<Option<Vec<u8>>> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    /// Replaces the checkpoint image atomically.
    ///
    /// Write temp, fsync, rename over the old image, fsync the directory.
    pub fn save_checkpoint(&self, image: &[u8]) -> CoreResult<()> {
        let temp_path = self.path.join(CHECKPOINT_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(image)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.checkpoint_path())?;
        self.sync_directory()
    }

    /// Deletes every entry except the lock file.
    fn clear(&self) -> CoreResult<()> {
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journals the rename itself
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("db");

        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(db_path.is_dir());
        assert!(dir.is_new_database());
        assert_eq!(dir.wal_path(), db_path.join("wal.log"));
    }

    #[test]
    fn open_fails_if_missing_and_no_create() {
        let temp = tempdir().unwrap();
        let result = DatabaseDir::open(&temp.path().join("nope"), false);
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("db");

        let first = DatabaseDir::open(&db_path, true).unwrap();
        assert!(matches!(
            DatabaseDir::open(&db_path, true),
            Err(CoreError::DatabaseLocked)
        ));

        drop(first);
        DatabaseDir::open(&db_path, true).unwrap();
    }

    #[test]
    fn checkpoint_replaced_atomically() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(&temp.path().join("db"), true).unwrap();

        assert!(dir.load_checkpoint().unwrap().is_none());
        dir.save_checkpoint(b"first").unwrap();
        dir.save_checkpoint(b"second").unwrap();

        assert_eq!(dir.load_checkpoint().unwrap().unwrap(), b"second");
        assert!(!dir.path().join(CHECKPOINT_TEMP).exists());
    }

    #[test]
    fn app_dirs_layout_and_wipe() {
        let temp = tempdir().unwrap();
        let dirs = AppDirs::new(temp.path());
        dirs.create_all().unwrap();

        assert!(dirs.photos.is_dir());
        assert_eq!(dirs.database, temp.path().join("Library").join("Database"));

        fs::write(dirs.database.join("wal.log"), b"x").unwrap();
        fs::write(dirs.database.join("CHECKPOINT"), b"x").unwrap();
        dirs.wipe_database().unwrap();

        let dir = DatabaseDir::open(&dirs.database, false).unwrap();
        assert!(dir.is_new_database());
        assert!(dirs.photos.is_dir());
    }

    #[test]
    fn wipe_refuses_locked_store() {
        let temp = tempdir().unwrap();
        let dirs = AppDirs::new(temp.path());
        dirs.create_all().unwrap();

        let held = DatabaseDir::open(&dirs.database, false).unwrap();
        fs::write(held.wal_path(), b"committed").unwrap();

        assert!(matches!(
            dirs.wipe_database(),
            Err(CoreError::DatabaseLocked)
        ));
        assert_eq!(fs::read(held.wal_path()).unwrap(), b"committed");

        drop(held);
        dirs.wipe_database().unwrap();
        assert!(!dirs.database.join("wal.log").exists());
    }
}
