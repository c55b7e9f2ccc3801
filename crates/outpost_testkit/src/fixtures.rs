//! Test fixtures and database helpers.
//!
//! Provides throwaway databases and app contexts that can be "restarted"
//! over the same bytes, cleanly or as if the process had crashed.

use crate::faults::{FailingBackend, FaultHandle};
use outpost_core::{AppContext, Config, Database, HeadlessPlatform, InitAction, ServerConfig};
use outpost_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Fingerprint used by [`TestApp`]; a valid UUID so maintenance keeps it.
pub const TEST_FINGERPRINT: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    storage: Storage,
}

enum Storage {
    Memory(InMemoryBackend),
    File(TempDir),
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// Creates an in-memory test database with `config`.
    pub fn memory_with_config(config: Config) -> Self {
        let backend = InMemoryBackend::new();
        let db = Database::open_with_backend(Box::new(backend.clone()), config)
            .expect("Failed to open in-memory database");
        Self {
            db,
            storage: Storage::Memory(backend),
        }
    }

    /// Creates an in-memory database whose medium fails on demand.
    pub fn with_faults() -> (Self, FaultHandle) {
        let backend = InMemoryBackend::new();
        let (failing, handle) = FailingBackend::new(Box::new(backend.clone()));
        let db = Database::open_with_backend(Box::new(failing), Config::default())
            .expect("Failed to open faulty database");
        (
            Self {
                db,
                storage: Storage::Memory(backend),
            },
            handle,
        )
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a file-based test database with `config`.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_with_config(&temp_dir.path().join("db"), config)
            .expect("Failed to open file database");
        Self {
            db,
            storage: Storage::File(temp_dir),
        }
    }

    /// Returns the database directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.storage {
            Storage::File(dir) => Some(dir.path().join("db")),
            Storage::Memory(_) => None,
        }
    }

    /// Returns the raw WAL bytes of an in-memory database.
    pub fn wal_bytes(&self) -> Option<Vec<u8>> {
        match &self.storage {
            Storage::Memory(backend) => Some(backend.data()),
            Storage::File(_) => None,
        }
    }

    /// Flips one byte of an in-memory WAL.
    pub fn corrupt_wal_byte(&self, offset: usize) {
        if let Storage::Memory(backend) = &self.storage {
            backend.corrupt_byte(offset);
        }
    }

    /// Closes the database and opens it again over the same bytes.
    pub fn restart(self) -> Self {
        self.try_restart().expect("Failed to reopen database")
    }

    /// Like [`restart`](Self::restart), returning the open error.
    pub fn try_restart(self) -> outpost_core::CoreResult<Self> {
        let config = self.db.config().clone();
        let Self { db, storage } = self;
        drop(db);

        let db = match &storage {
            Storage::Memory(backend) => {
                Database::open_with_backend(Box::new(backend.clone()), config)?
            }
            Storage::File(dir) => Database::open_with_config(&dir.path().join("db"), config)?,
        };
        Ok(Self { db, storage })
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// An [`AppContext`] in a temporary base directory.
pub struct TestApp {
    /// The context.
    pub ctx: AppContext,
    /// Progress messages seen while opening, in order.
    pub progress: Vec<String>,
    platform: Arc<HeadlessPlatform>,
    server: ServerConfig,
    temp_dir: TempDir,
}

impl TestApp {
    /// Opens a fresh context.
    pub fn new() -> Self {
        Self::with_platform(HeadlessPlatform::with_fingerprint(TEST_FINGERPRINT))
    }

    /// Opens a fresh context with `platform`.
    pub fn with_platform(platform: HeadlessPlatform) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let platform = Arc::new(platform);
        let server = ServerConfig::default();
        let mut progress = Vec::new();
        let ctx = Self::open_ctx(temp_dir.path(), &server, &platform, InitAction::Normal, &mut progress)
            .expect("Failed to open app context");
        Self {
            ctx,
            progress,
            platform,
            server,
            temp_dir,
        }
    }

    /// Returns the base directory.
    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the platform, for inspecting recorded side effects.
    pub fn platform(&self) -> &HeadlessPlatform {
        &self.platform
    }

    /// Closes cleanly and reopens with `action`.
    pub fn restart(self, action: InitAction) -> Self {
        self.ctx.close().expect("Failed to close app context");
        self.reopen(action)
    }

    /// Drops the context without closing it, then reopens with `action`.
    pub fn crash_and_restart(self, action: InitAction) -> Self {
        self.reopen(action)
    }

    /// Reopens with `action`, returning the open error.
    pub fn try_reopen(self, action: InitAction) -> (outpost_core::CoreResult<AppContext>, TempDir) {
        let Self {
            ctx,
            platform,
            server,
            temp_dir,
            ..
        } = self;
        drop(ctx);
        let mut progress = Vec::new();
        let result = Self::open_ctx(temp_dir.path(), &server, &platform, action, &mut progress);
        (result, temp_dir)
    }

    fn reopen(self, action: InitAction) -> Self {
        let Self {
            ctx,
            platform,
            server,
            temp_dir,
            ..
        } = self;
        drop(ctx);
        let mut progress = Vec::new();
        let ctx = Self::open_ctx(temp_dir.path(), &server, &platform, action, &mut progress)
            .expect("Failed to reopen app context");
        Self {
            ctx,
            progress,
            platform,
            server,
            temp_dir,
        }
    }

    fn open_ctx(
        base: &Path,
        server: &ServerConfig,
        platform: &Arc<HeadlessPlatform>,
        action: InitAction,
        progress: &mut Vec<String>,
    ) -> outpost_core::CoreResult<AppContext> {
        let platform: Arc<dyn outpost_core::Platform> = platform.clone();
        AppContext::init(base, server.clone(), platform, action, &mut |message| {
            progress.push(message.to_string())
        })
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestApp {
    type Target = AppContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}
