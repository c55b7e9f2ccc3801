//! Application context: owns every core subsystem.

use crate::config::{Config, ServerConfig};
use crate::database::Database;
use crate::dir::AppDirs;
use crate::error::CoreResult;
use crate::identity::IdentityStore;
use crate::keys;
use crate::maintenance::{MaintenanceEngine, MaintenanceReport};
use crate::migration::{MigrationManager, MigrationRunResult};
use crate::notify::NotificationHub;
use crate::op_id::OpIdAllocator;
use crate::platform::{InitAction, Platform};
use crate::settings::Settings;
use crate::store::{Snapshot, Transaction};
use crate::version::ProtocolVersion;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// The client's persistence core.
///
/// Built by [`open`](Self::open) or [`init`](Self::init); by the time a
/// context is returned the store is migrated and identity, settings and the
/// op-id counter are loaded. Dropping a context without [`close`](Self::close)
/// leaves the open-session marker behind, so the next open sees an unclean
/// shutdown.
pub struct AppContext {
    dirs: AppDirs,
    server: RwLock<ServerConfig>,
    platform: Arc<dyn Platform>,
    db: Arc<Database>,
    hub: Arc<NotificationHub>,
    identity: IdentityStore,
    settings: Settings,
    op_ids: OpIdAllocator,
    maintenance: MaintenanceEngine,
    migration: MigrationRunResult,
    unclean_shutdown: AtomicBool,
}

impl AppContext {
    /// Opens the context under `base_dir`.
    ///
    /// Creates `Library/Database`, `Library/Photos` and
    /// `Library/ServerPhotos`, wipes the database first when `reset`, runs
    /// pending migrations (reporting through `progress` and the hub), then
    /// records the open session.
    ///
    /// # Errors
    ///
    /// - `IncompatibleVersion` if the store is newer than this build
    /// - `Migration` if a step fails; the host may retry with `reset`
    /// - `DatabaseLocked` / `StoreCorruption` / `StoreIo` from the store
    pub fn open(
        base_dir: &Path,
        server: ServerConfig,
        platform: Arc<dyn Platform>,
        reset: bool,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<Self> {
        Self::open_with_hub(
            base_dir,
            server,
            platform,
            reset,
            Arc::new(NotificationHub::new()),
            progress,
        )
    }

    /// Like [`open`](Self::open) with a hub the caller subscribed to
    /// beforehand, so migration progress reaches existing subscribers.
    pub fn open_with_hub(
        base_dir: &Path,
        server: ServerConfig,
        platform: Arc<dyn Platform>,
        reset: bool,
        hub: Arc<NotificationHub>,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<Self> {
        let dirs = AppDirs::new(base_dir);
        dirs.create_all()?;
        if reset {
            warn!(path = %dirs.database.display(), "resetting database");
            dirs.wipe_database()?;
        }

        let db = Arc::new(Database::open_with_config(&dirs.database, Config::default())?);

        let mut manager = MigrationManager::with_protocol_versions();
        platform.register_migrations(&mut manager)?;
        let migration = manager.run(&db, &mut |message| {
            progress(message);
            hub.maintenance_progress().publish(message);
        })?;

        let unclean_shutdown = !matches!(
            keys::get_record::<bool>(db.as_ref(), keys::OPEN_SESSION),
            Ok(None)
        );
        if unclean_shutdown {
            warn!("previous session did not shut down cleanly");
        }
        db.transaction(|txn| keys::put_record(txn, keys::OPEN_SESSION, &true))?;

        let identity = IdentityStore::load(Arc::clone(&db), platform.device_fingerprint())?;
        let settings = Settings::load(Arc::clone(&db), Arc::clone(&hub));
        let op_ids = OpIdAllocator::new(Arc::clone(&db));

        let mut maintenance =
            MaintenanceEngine::with_builtin_checks(ProtocolVersion::CURRENT.as_u32());
        for check in platform.integrity_checks() {
            maintenance.register(check);
        }

        info!(
            base = %base_dir.display(),
            version = migration.final_version,
            migrated = migration.applied_count(),
            "app context open"
        );

        Ok(Self {
            dirs,
            server: RwLock::new(server),
            platform,
            db,
            hub,
            identity,
            settings,
            op_ids,
            maintenance,
            migration,
            unclean_shutdown: AtomicBool::new(unclean_shutdown),
        })
    }

    /// Opens the context in one of the host's three modes and runs the
    /// follow-up maintenance pass.
    ///
    /// Maintenance failure does not fail `init`; it is published on
    /// `maintenance_done`.
    pub fn init(
        base_dir: &Path,
        server: ServerConfig,
        platform: Arc<dyn Platform>,
        action: InitAction,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<Self> {
        info!(?action, "initialising app context");
        let ctx = Self::open(base_dir, server, platform, action == InitAction::Reset, progress)?;
        ctx.run_maintenance(action == InitAction::Fsck, progress);
        Ok(ctx)
    }

    /// Like [`init`](Self::init) with the mode the platform reports.
    pub fn launch(
        base_dir: &Path,
        server: ServerConfig,
        platform: Arc<dyn Platform>,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<Self> {
        let action = platform.init_action();
        Self::init(base_dir, server, platform, action, progress)
    }

    /// Runs maintenance if forced, requested by a migration, or after an
    /// unclean shutdown. Publishes `maintenance_done` with the result.
    pub fn run_maintenance(&self, force: bool, progress: &mut dyn FnMut(&str)) -> bool {
        let success = match self.run_maintenance_report(force, progress) {
            Ok(report) => report.success(),
            Err(err) => {
                warn!(error = %err, "maintenance aborted");
                false
            }
        };
        self.hub.maintenance_done().publish(&success);
        success
    }

    /// Runs maintenance and returns the full report. Does not publish
    /// `maintenance_done`.
    pub fn run_maintenance_report(
        &self,
        force: bool,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<MaintenanceReport> {
        let report = self.maintenance.run_report(
            &self.db,
            force,
            self.unclean_shutdown.load(Ordering::SeqCst),
            &mut |message| {
                progress(message);
                self.hub.maintenance_progress().publish(message);
            },
        )?;

        if report.committed {
            self.unclean_shutdown.store(false, Ordering::SeqCst);
            if report.repaired() > 0 {
                self.identity.reload()?;
                self.settings.reload();
            }
        }
        Ok(report)
    }

    /// Clears the open-session marker and checkpoints the store.
    pub fn close(&self) -> CoreResult<()> {
        self.db.transaction(|txn| txn.delete(keys::OPEN_SESSION))?;
        self.db.checkpoint()?;
        self.db.close()?;
        info!("app context closed");
        Ok(())
    }

    /// Returns the database.
    #[must_use]
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Begins a transaction.
    pub fn new_transaction(&self) -> CoreResult<Transaction> {
        self.db.begin()
    }

    /// Takes a snapshot of the latest committed state.
    pub fn new_snapshot(&self) -> CoreResult<Snapshot> {
        self.db.snapshot()
    }

    /// Returns a fresh, strictly increasing local operation id.
    pub fn next_local_operation_id(&self) -> CoreResult<i64> {
        self.op_ids.next_local_operation_id()
    }

    /// Returns the cached user and device identity.
    #[must_use]
    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    /// Returns the persisted preferences.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the hub every change notification goes through.
    #[must_use]
    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Returns the host platform.
    #[must_use]
    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Returns what the migration step did at open.
    #[must_use]
    pub fn migration_result(&self) -> &MigrationRunResult {
        &self.migration
    }

    /// True if the previous session crashed and no maintenance pass has
    /// succeeded since.
    #[must_use]
    pub fn unclean_shutdown(&self) -> bool {
        self.unclean_shutdown.load(Ordering::SeqCst)
    }

    /// True if cloud storage is preferred and the platform allows it.
    #[must_use]
    pub fn cloud_storage_enabled(&self) -> bool {
        self.platform.cloud_storage_enabled(&self.settings)
    }

    /// Returns `http` or `https` for the configured server.
    #[must_use]
    pub fn server_protocol(&self) -> String {
        self.server.read().protocol.clone()
    }

    /// Returns the configured server host.
    #[must_use]
    pub fn server_host(&self) -> String {
        self.server.read().host.clone()
    }

    /// Points the client at a different host.
    pub fn set_server_host(&self, host: impl Into<String>) {
        let host = host.into();
        info!(host = %host, "server host changed");
        self.server.write().host = host;
    }

    /// Returns the configured server port.
    #[must_use]
    pub fn server_port(&self) -> u16 {
        self.server.read().port
    }

    /// Returns the local photo directory.
    #[must_use]
    pub fn photo_dir(&self) -> &Path {
        &self.dirs.photos
    }

    /// Returns the directory for photos downloaded from the server.
    #[must_use]
    pub fn server_photo_dir(&self) -> &Path {
        &self.dirs.server_photos
    }

    /// Returns the database directory.
    #[must_use]
    pub fn database_dir(&self) -> PathBuf {
        self.dirs.database.clone()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("base", &self.dirs.base)
            .field("server_host", &self.server_host())
            .field("user_id", &self.identity.user_id())
            .finish_non_exhaustive()
    }
}
