//! Protocol-version migrations.
//!
//! Migrations in Outpost are:
//! - **Versioned**: each one targets exactly one [`ProtocolVersion`]
//! - **Forward-only**: a store newer than the build is rejected, never rolled back
//! - **Sequential**: every version in `(stored, current]` runs once, in order
//! - **Transactional**: a migration and the version bump commit together
//!
//! ## Usage
//!
//! ```rust
//! use outpost_core::migration::{Migration, MigrationContext, MigrationManager};
//! use outpost_core::{CoreResult, Database};
//!
//! struct SplitNames;
//! impl Migration for SplitNames {
//!     fn version(&self) -> u32 { 15 }
//!     fn name(&self) -> &str { "split_names" }
//!     fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
//!         ctx.put(b"contacts/format".to_vec(), b"split".to_vec())
//!     }
//! }
//!
//! let db = Database::open_in_memory()?;
//! let mut manager = MigrationManager::with_protocol_versions();
//! manager.replace(Box::new(SplitNames))?;
//! let result = manager.run(&db, &mut |_| {})?;
//! assert_eq!(result.final_version, 25);
//! # Ok::<(), outpost_core::CoreError>(())
//! ```

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::store::{DbRead, Transaction};
use crate::version::ProtocolVersion;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Information about a registered migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Target protocol version.
    pub version: u32,
    /// Human-readable name.
    pub name: String,
    /// Description of what this migration does.
    pub description: Option<String>,
}

/// Result of one applied migration.
#[derive(Debug, Clone)]
pub struct MigrationResult {
    /// Version the migration moved the store to.
    pub version: u32,
    /// The migration name.
    pub name: String,
    /// Operations the migration recorded.
    pub operations: Vec<MigrationOperation>,
}

/// Result of bringing a store up to date.
#[derive(Debug, Clone)]
pub struct MigrationRunResult {
    /// Version found in the store (absent counts as 0).
    pub from_version: u32,
    /// Version persisted after the run.
    pub final_version: u32,
    /// Migrations applied, in order.
    pub migrations: Vec<MigrationResult>,
    /// True if any migration asked for a maintenance pass.
    pub maintenance_requested: bool,
}

impl MigrationRunResult {
    /// Number of migrations applied.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.migrations.len()
    }
}

/// Where the version check and migration sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    /// Nothing has been read yet.
    Unopened,
    /// The stored version has been read and compared.
    VersionChecked,
    /// Migrating to the given version.
    Migrating(u32),
    /// The store is at the current version.
    Opened,
    /// A migration failed or the store is too new.
    MigrationFailed,
}

/// An operation performed during a migration, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOperation {
    /// Wrote a key.
    Put {
        /// Key written.
        key: Vec<u8>,
    },
    /// Deleted a key.
    Delete {
        /// Key deleted.
        key: Vec<u8>,
    },
    /// Asked for a maintenance pass on the next open.
    RequestMaintenance,
    /// Custom operation.
    Custom {
        /// Description of the operation.
        description: String,
    },
}

/// Context passed to [`Migration::up`].
///
/// Wraps the transaction the version bump will commit in, so a migration's
/// writes land atomically with the new version or not at all.
pub struct MigrationContext<'a> {
    txn: &'a mut Transaction,
    from_version: u32,
    target_version: u32,
    operations: Vec<MigrationOperation>,
    maintenance_requested: bool,
}

impl<'a> MigrationContext<'a> {
    /// Creates a context over `txn`.
    pub fn new(txn: &'a mut Transaction, from_version: u32, target_version: u32) -> Self {
        Self {
            txn,
            from_version,
            target_version,
            operations: Vec::new(),
            maintenance_requested: false,
        }
    }

    /// The migration's transaction.
    pub fn txn(&mut self) -> &mut Transaction {
        &mut *self.txn
    }

    /// Version the store is at before this migration.
    #[must_use]
    pub fn from_version(&self) -> u32 {
        self.from_version
    }

    /// Version this migration produces.
    #[must_use]
    pub fn target_version(&self) -> u32 {
        self.target_version
    }

    /// Reads through the migration's transaction.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.txn.get(key)
    }

    /// Scans through the migration's transaction.
    pub fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.txn.scan_prefix(prefix)
    }

    /// Writes a key and records the operation.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> CoreResult<()> {
        self.txn.put(key.clone(), value)?;
        self.operations.push(MigrationOperation::Put { key });
        Ok(())
    }

    /// Deletes a key and records the operation.
    pub fn delete(&mut self, key: Vec<u8>) -> CoreResult<()> {
        self.txn.delete(key.clone())?;
        self.operations.push(MigrationOperation::Delete { key });
        Ok(())
    }

    /// Persists the "fsck requested" marker in this migration's transaction.
    ///
    /// The maintenance pass that follows startup then runs even without a
    /// crash or an explicit force.
    pub fn request_maintenance(&mut self) -> CoreResult<()> {
        keys::put_record(&mut *self.txn, keys::FSCK_REQUESTED, &true)?;
        self.maintenance_requested = true;
        self.operations.push(MigrationOperation::RequestMaintenance);
        Ok(())
    }

    /// Records a custom operation.
    pub fn custom(&mut self, description: &str) {
        self.operations.push(MigrationOperation::Custom {
            description: description.to_string(),
        });
    }

    /// Returns the operations recorded so far.
    #[must_use]
    pub fn operations(&self) -> &[MigrationOperation] {
        &self.operations
    }

    fn finish(self) -> (Vec<MigrationOperation>, bool) {
        (self.operations, self.maintenance_requested)
    }
}

impl fmt::Debug for MigrationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationContext")
            .field("from_version", &self.from_version)
            .field("target_version", &self.target_version)
            .field("operations", &self.operations.len())
            .finish()
    }
}

/// Trait for defining migrations.
pub trait Migration: Send + Sync {
    /// Returns the protocol version this migration produces.
    fn version(&self) -> u32;

    /// Returns the name of this migration.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Runs the migration inside the version-bump transaction.
    fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()>;
}

/// A migration that only advances the version.
///
/// Registered for every protocol version by
/// [`MigrationManager::with_protocol_versions`] so the sequence is gap-free
/// before any collaborator supplies real work.
#[derive(Debug, Clone, Copy)]
pub struct VersionMarker {
    version: ProtocolVersion,
}

impl VersionMarker {
    /// Creates a marker for `version`.
    #[must_use]
    pub const fn new(version: ProtocolVersion) -> Self {
        Self { version }
    }
}

impl Migration for VersionMarker {
    fn version(&self) -> u32 {
        self.version.as_u32()
    }

    fn name(&self) -> &str {
        self.version.name()
    }

    fn up(&self, _ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
        Ok(())
    }
}

/// Reads the persisted protocol version. `None` means a brand-new store.
pub fn stored_version(reader: &(impl DbRead + ?Sized)) -> CoreResult<Option<u32>> {
    keys::get_record(reader, keys::PROTOCOL_VERSION)
}

/// Registry and runner for protocol migrations.
pub struct MigrationManager {
    /// Registered migrations, keyed by target version.
    migrations: BTreeMap<u32, Box<dyn Migration>>,
    current: u32,
    phase: Mutex<MigrationPhase>,
}

impl MigrationManager {
    /// Creates an empty manager targeting [`ProtocolVersion::CURRENT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_current(ProtocolVersion::CURRENT.as_u32())
    }

    /// Creates an empty manager targeting `current`.
    #[must_use]
    pub fn with_current(current: u32) -> Self {
        Self {
            migrations: BTreeMap::new(),
            current,
            phase: Mutex::new(MigrationPhase::Unopened),
        }
    }

    /// Creates a manager with a [`VersionMarker`] for every protocol version
    /// after `INITIAL_VERSION`.
    #[must_use]
    pub fn with_protocol_versions() -> Self {
        let mut manager = Self::new();
        for version in &ProtocolVersion::ALL[1..] {
            manager
                .migrations
                .insert(version.as_u32(), Box::new(VersionMarker::new(*version)));
        }
        manager
    }

    /// Returns the version this manager migrates to.
    #[must_use]
    pub fn current_version(&self) -> u32 {
        self.current
    }

    /// Returns the phase of the last (or running) [`run`](Self::run).
    #[must_use]
    pub fn phase(&self) -> MigrationPhase {
        *self.phase.lock()
    }

    /// Registers a migration.
    ///
    /// Returns an error if the version is taken or outside `1..=current`.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        self.check_range(version, migration.name())?;
        if self.migrations.contains_key(&version) {
            return Err(CoreError::migration(
                version,
                migration.name(),
                "version already registered",
            ));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Installs a migration, replacing whatever was registered for its
    /// version. Returns the replaced migration.
    pub fn replace(&mut self, migration: Box<dyn Migration>) -> CoreResult<Option<Box<dyn Migration>>> {
        let version = migration.version();
        self.check_range(version, migration.name())?;
        Ok(self.migrations.insert(version, migration))
    }

    fn check_range(&self, version: u32, name: &str) -> CoreResult<()> {
        if version == 0 || version > self.current {
            return Err(CoreError::migration(
                version,
                name,
                format!("version outside 1..={}", self.current),
            ));
        }
        Ok(())
    }

    /// Returns list of registered migrations.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.values().map(|m| info_of(m.as_ref())).collect()
    }

    /// Returns the migrations a store at `from` still needs.
    #[must_use]
    pub fn pending(&self, from: u32) -> Vec<MigrationInfo> {
        self.migrations
            .range(from.saturating_add(1)..)
            .map(|(_, m)| info_of(m.as_ref()))
            .collect()
    }

    /// Validates that migrations cover `1..=current` with no gaps.
    pub fn validate(&self) -> CoreResult<()> {
        for expected in 1..=self.current {
            if !self.migrations.contains_key(&expected) {
                return Err(CoreError::migration(
                    expected,
                    ProtocolVersion::from_u32(expected).map_or("unknown", ProtocolVersion::name),
                    "no migration registered for version",
                ));
            }
        }
        Ok(())
    }

    /// Brings the store to the current version.
    ///
    /// Each pending migration runs in its own transaction together with the
    /// version bump; a failure leaves the store at the last successful step.
    /// `progress` receives `"Upgrading data (k of n): <name>"` before each
    /// step.
    ///
    /// # Errors
    ///
    /// - `IncompatibleVersion` if the store is newer than this build; nothing is written
    /// - `Migration` if a step fails or the registry has a gap
    pub fn run(
        &self,
        db: &Database,
        progress: &mut dyn FnMut(&str),
    ) -> CoreResult<MigrationRunResult> {
        self.set_phase(MigrationPhase::Unopened);
        let stored = stored_version(db)?;
        let from = stored.unwrap_or(ProtocolVersion::Initial.as_u32());
        self.set_phase(MigrationPhase::VersionChecked);

        let mut result = MigrationRunResult {
            from_version: from,
            final_version: from,
            migrations: Vec::new(),
            maintenance_requested: false,
        };

        if from > self.current {
            self.set_phase(MigrationPhase::MigrationFailed);
            warn!(stored = from, current = self.current, "store is newer than this build");
            return Err(CoreError::IncompatibleVersion {
                stored: from,
                current: self.current,
            });
        }
        if from == self.current {
            self.set_phase(MigrationPhase::Opened);
            return Ok(result);
        }

        if let Err(err) = self.validate() {
            self.set_phase(MigrationPhase::MigrationFailed);
            return Err(err);
        }

        let total = self.current - from;
        info!(from, to = self.current, "migrating store");

        for (step, version) in (from + 1..=self.current).enumerate() {
            let Some(migration) = self.migrations.get(&version) else {
                self.set_phase(MigrationPhase::MigrationFailed);
                return Err(CoreError::migration(version, "unknown", "no migration registered"));
            };
            let name = migration.name().to_string();
            self.set_phase(MigrationPhase::Migrating(version));

            let message = format!("Upgrading data ({} of {}): {}", step + 1, total, name);
            info!(version, name = %name, "{message}");
            progress(&message);

            match Self::apply(db, migration.as_ref(), version) {
                Ok((operations, maintenance)) => {
                    result.final_version = version;
                    result.maintenance_requested |= maintenance;
                    result.migrations.push(MigrationResult {
                        version,
                        name,
                        operations,
                    });
                }
                Err(err) => {
                    self.set_phase(MigrationPhase::MigrationFailed);
                    warn!(version, name = %name, error = %err, "migration failed");
                    return Err(match err {
                        err @ CoreError::Migration { .. } => err,
                        other => CoreError::migration(version, name, other.to_string()),
                    });
                }
            }
        }

        self.set_phase(MigrationPhase::Opened);
        info!(version = result.final_version, applied = result.applied_count(), "store migrated");
        Ok(result)
    }

    fn apply(
        db: &Database,
        migration: &dyn Migration,
        version: u32,
    ) -> CoreResult<(Vec<MigrationOperation>, bool)> {
        let mut txn = db.begin()?;
        let mut ctx = MigrationContext::new(&mut txn, version - 1, version);
        migration.up(&mut ctx)?;
        let outcome = ctx.finish();
        keys::put_record(&mut txn, keys::PROTOCOL_VERSION, &version)?;
        txn.commit()?;
        Ok(outcome)
    }

    fn set_phase(&self, phase: MigrationPhase) {
        *self.phase.lock() = phase;
    }
}

fn info_of(migration: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        version: migration.version(),
        name: migration.name().to_string(),
        description: migration.description().map(String::from),
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationManager")
            .field("current", &self.current)
            .field("registered", &self.migrations.len())
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct TestMigration {
        version: u32,
        name: String,
        should_fail: bool,
        log: Option<Arc<Mutex<Vec<u32>>>>,
    }

    impl Migration for TestMigration {
        fn version(&self) -> u32 {
            self.version
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
            if let Some(log) = &self.log {
                log.lock().push(self.version);
            }
            ctx.put(
                format!("test/{}", self.version).into_bytes(),
                b"done".to_vec(),
            )?;
            if self.should_fail {
                return Err(CoreError::invalid_operation("intentional failure"));
            }
            ctx.custom("test operation");
            Ok(())
        }
    }

    fn make_migration(version: u32, name: &str) -> Box<dyn Migration> {
        Box::new(TestMigration {
            version,
            name: name.to_string(),
            should_fail: false,
            log: None,
        })
    }

    fn make_failing_migration(version: u32, name: &str) -> Box<dyn Migration> {
        Box::new(TestMigration {
            version,
            name: name.to_string(),
            should_fail: true,
            log: None,
        })
    }

    fn set_version(db: &Database, version: u32) {
        db.transaction(|txn| keys::put_record(txn, keys::PROTOCOL_VERSION, &version))
            .unwrap();
    }

    #[test]
    fn register_and_list_migrations() {
        let mut manager = MigrationManager::with_current(2);
        manager.register(make_migration(1, "first")).unwrap();
        manager.register(make_migration(2, "second")).unwrap();

        let list = manager.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].version, 1);
        assert_eq!(list[0].name, "first");
        assert_eq!(list[1].name, "second");
    }

    #[test]
    fn duplicate_version_rejected() {
        let mut manager = MigrationManager::new();
        manager.register(make_migration(1, "first")).unwrap();
        assert!(manager.register(make_migration(1, "duplicate")).is_err());
    }

    #[test]
    fn out_of_range_rejected() {
        let mut manager = MigrationManager::with_current(3);
        assert!(manager.register(make_migration(0, "zero")).is_err());
        assert!(manager.register(make_migration(4, "future")).is_err());
    }

    #[test]
    fn protocol_registry_is_complete() {
        let manager = MigrationManager::with_protocol_versions();
        assert!(manager.validate().is_ok());
        let list = manager.list();
        assert_eq!(list.len(), 25);
        assert_eq!(list[6].name, "UPDATE_SHARE_VERSION");
    }

    #[test]
    fn replace_swaps_marker() {
        let mut manager = MigrationManager::with_protocol_versions();
        let old = manager.replace(make_migration(7, "update_share")).unwrap();
        assert_eq!(old.map(|m| m.name().to_string()).as_deref(), Some("UPDATE_SHARE_VERSION"));
        assert_eq!(manager.list()[6].name, "update_share");
    }

    #[test]
    fn validate_detects_gaps() {
        let mut manager = MigrationManager::with_current(3);
        manager.register(make_migration(1, "first")).unwrap();
        manager.register(make_migration(3, "third")).unwrap();
        assert!(manager.validate().is_err());
    }

    #[test]
    fn pending_skips_applied() {
        let manager = MigrationManager::with_protocol_versions();
        let pending = manager.pending(23);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].version, 24);
        assert!(manager.pending(25).is_empty());
    }

    #[test]
    fn fresh_store_runs_everything() {
        let db = Database::open_in_memory().unwrap();
        let manager = MigrationManager::with_protocol_versions();
        let mut messages = Vec::new();

        let result = manager.run(&db, &mut |m| messages.push(m.to_string())).unwrap();

        assert_eq!(result.from_version, 0);
        assert_eq!(result.final_version, 25);
        assert_eq!(result.applied_count(), 25);
        assert_eq!(stored_version(&db).unwrap(), Some(25));
        assert_eq!(manager.phase(), MigrationPhase::Opened);
        assert_eq!(messages[0], "Upgrading data (1 of 25): ADD_HEADERS_VERSION");
        assert_eq!(messages[24], "Upgrading data (25 of 25): SUPPRESS_EMPTY_TITLE");
    }

    #[test]
    fn runs_remaining_steps_in_order() {
        let db = Database::open_in_memory().unwrap();
        set_version(&db, 1);

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::with_protocol_versions();
        for version in 1..=25 {
            manager
                .replace(Box::new(TestMigration {
                    version,
                    name: format!("step{version}"),
                    should_fail: false,
                    log: Some(Arc::clone(&log)),
                }))
                .unwrap();
        }

        manager.run(&db, &mut |_| {}).unwrap();
        assert_eq!(*log.lock(), (2..=25).collect::<Vec<_>>());
        assert_eq!(stored_version(&db).unwrap(), Some(25));
    }

    #[test]
    fn up_to_date_store_is_untouched() {
        let db = Database::open_in_memory().unwrap();
        set_version(&db, 25);
        let seq = db.committed_seq();

        let result = MigrationManager::with_protocol_versions()
            .run(&db, &mut |_| {})
            .unwrap();
        assert_eq!(result.applied_count(), 0);
        assert_eq!(db.committed_seq(), seq);
    }

    #[test]
    fn failure_stops_at_last_good_version() {
        let db = Database::open_in_memory().unwrap();
        set_version(&db, 5);

        let mut manager = MigrationManager::with_protocol_versions();
        manager.replace(make_migration(6, "update_post")).unwrap();
        manager.replace(make_failing_migration(7, "update_share")).unwrap();

        let err = manager.run(&db, &mut |_| {}).unwrap_err();
        match err {
            CoreError::Migration { version, name, .. } => {
                assert_eq!(version, 7);
                assert_eq!(name, "update_share");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.phase(), MigrationPhase::MigrationFailed);
        assert_eq!(stored_version(&db).unwrap(), Some(6));
        assert!(db.contains(b"test/6").unwrap());
        assert!(!db.contains(b"test/7").unwrap());
    }

    #[test]
    fn newer_store_rejected_without_writes() {
        let db = Database::open_in_memory().unwrap();
        set_version(&db, 26);
        let seq = db.committed_seq();

        let err = MigrationManager::with_protocol_versions()
            .run(&db, &mut |_| {})
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::IncompatibleVersion {
                stored: 26,
                current: 25
            }
        ));
        assert_eq!(db.committed_seq(), seq);
        assert_eq!(stored_version(&db).unwrap(), Some(26));
    }

    #[test]
    fn gap_fails_before_any_write() {
        let db = Database::open_in_memory().unwrap();
        let mut manager = MigrationManager::new();
        manager.register(make_migration(1, "first")).unwrap();

        assert!(manager.run(&db, &mut |_| {}).is_err());
        assert_eq!(stored_version(&db).unwrap(), None);
    }

    #[test]
    fn request_maintenance_persists_marker() {
        struct NeedsFsck;
        impl Migration for NeedsFsck {
            fn version(&self) -> u32 {
                ProtocolVersion::ExtractFileSizes.as_u32()
            }
            fn name(&self) -> &str {
                "extract_file_sizes"
            }
            fn up(&self, ctx: &mut MigrationContext<'_>) -> CoreResult<()> {
                ctx.request_maintenance()
            }
        }

        let db = Database::open_in_memory().unwrap();
        set_version(&db, 11);
        let mut manager = MigrationManager::with_protocol_versions();
        manager.replace(Box::new(NeedsFsck)).unwrap();

        let result = manager.run(&db, &mut |_| {}).unwrap();
        assert!(result.maintenance_requested);
        assert_eq!(
            keys::get_record::<bool>(&db, keys::FSCK_REQUESTED).unwrap(),
            Some(true)
        );
    }

    #[test]
    fn migration_context_records_operations() {
        let db = Database::open_in_memory().unwrap();
        let mut txn = db.begin().unwrap();
        let mut ctx = MigrationContext::new(&mut txn, 3, 4);

        ctx.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        ctx.delete(b"b".to_vec()).unwrap();
        ctx.custom("data transformation");

        assert_eq!(ctx.operations().len(), 3);
        assert_eq!(ctx.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(ctx.target_version(), 4);
    }
}
