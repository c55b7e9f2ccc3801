//! Database facade and recovery.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::store::inner::StoreCore;
use crate::store::{DbRead, RecoveryStats, Snapshot, Transaction};
use crate::types::SequenceNumber;
use crate::wal::WalManager;
use outpost_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// The client's local key-value store.
///
/// `Database` is the single owner of the physical store. It hands out
/// [`Transaction`] handles for mutation and [`Snapshot`] handles for stable
/// reads; both are independent of the `Database` value's lifetime.
///
/// ```rust
/// use outpost_core::Database;
///
/// let db = Database::open_in_memory()?;
/// let mut txn = db.begin()?;
/// txn.put(b"settings/upload_logs".to_vec(), vec![0xf5])?;
/// txn.commit()?;
/// assert!(db.contains(b"settings/upload_logs")?);
/// # Ok::<(), outpost_core::CoreError>(())
/// ```
pub struct Database {
    core: Arc<StoreCore>,
}

impl Database {
    /// Opens a database from a directory path with default configuration.
    ///
    /// # Errors
    ///
    /// - `DatabaseLocked` if another handle holds the directory
    /// - `StoreCorruption` / `ChecksumMismatch` if recovery finds damage
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path.
    ///
    /// Takes the directory lock, loads the checkpoint image if any, and
    /// replays the WAL. A torn final record is dropped.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let backend = FileBackend::open(&dir.wal_path())?;
        info!(path = %path.display(), "opening database");
        Self::assemble(config, Some(dir), Box::new(backend))
    }

    /// Opens a database over an arbitrary WAL backend.
    ///
    /// There is no directory, so checkpoints only reclaim versions; the WAL
    /// keeps every batch.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        config: Config,
    ) -> CoreResult<Self> {
        Self::assemble(config, None, backend)
    }

    /// Opens a fresh in-memory database.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), Config::default())
    }

    fn assemble(
        config: Config,
        dir: Option<DatabaseDir>,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let wal = WalManager::new(backend, config.sync_on_commit);
        let core = StoreCore::open(config, dir, wal)?;
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Begins a new transaction.
    pub fn begin(&self) -> CoreResult<Transaction> {
        self.core.ensure_open()?;
        Ok(Transaction::new(self.core.next_txid(), Arc::clone(&self.core)))
    }

    /// Commits a transaction opened on this database.
    pub fn commit(&self, txn: Transaction) -> CoreResult<SequenceNumber> {
        if !txn.belongs_to(&self.core) {
            return Err(CoreError::invalid_operation(
                "transaction belongs to a different database",
            ));
        }
        txn.commit()
    }

    /// Runs `f` in a transaction, committing if it returns `Ok`.
    ///
    /// If `f` fails the transaction is dropped and nothing is written.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut txn = self.begin()?;
        let value = f(&mut txn)?;
        txn.commit()?;
        Ok(value)
    }

    /// Returns a snapshot of the latest committed state.
    pub fn snapshot(&self) -> CoreResult<Snapshot> {
        self.core.ensure_open()?;
        Ok(Snapshot::new(Arc::clone(&self.core)))
    }

    /// Reads the latest committed value of `key`.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.core.ensure_open()?;
        Ok(self.core.get_latest(key))
    }

    /// Returns true if `key` has a committed value.
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Scans committed entries under `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.core.ensure_open()?;
        Ok(self.core.scan_prefix_latest(prefix))
    }

    /// Writes a checkpoint image, empties the WAL, and reclaims versions no
    /// live snapshot can observe.
    pub fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        self.core.checkpoint()
    }

    /// Flushes the WAL to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.core.flush()
    }

    /// Returns the last committed sequence.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.core.committed_seq()
    }

    /// Returns what recovery found when the database was opened.
    #[must_use]
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.core.recovery()
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.live_count()
    }

    /// Returns true if no key has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of retained versions, including ones kept alive
    /// for snapshots.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.core.version_count()
    }

    /// Returns the number of live snapshot handles.
    #[must_use]
    pub fn live_snapshots(&self) -> usize {
        self.core.live_snapshot_count()
    }

    /// Returns the WAL size in bytes.
    pub fn wal_size(&self) -> CoreResult<u64> {
        self.core.wal_size()
    }

    /// Returns the database directory, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.core.dir().map(DatabaseDir::path)
    }

    /// Returns the database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.core.config()
    }

    /// Closes the database.
    ///
    /// Later operations fail with `DatabaseClosed`; outstanding snapshots
    /// stay readable. The directory lock is released once every handle is
    /// gone.
    pub fn close(&self) -> CoreResult<()> {
        self.core.close()
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.core.is_closed()
    }
}

impl DbRead for Database {
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Database::get(self, key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Database::scan_prefix(self, prefix)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn put(db: &Database, key: &str, value: &str) -> SequenceNumber {
        let mut txn = db.begin().unwrap();
        txn.put(key.as_bytes(), value.as_bytes()).unwrap();
        txn.commit().unwrap()
    }

    #[test]
    fn open_in_memory() {
        let db = create_db();
        assert!(db.is_open());
        assert!(db.is_empty());
        assert_eq!(db.committed_seq(), SequenceNumber::new(0));
    }

    #[test]
    fn transaction_isolation() {
        let db = create_db();

        let mut txn = db.begin().unwrap();
        txn.put(b"k".to_vec(), b"v".to_vec()).unwrap();

        // Uncommitted data not visible outside transaction
        assert_eq!(db.get(b"k").unwrap(), None);
        // But visible inside
        assert_eq!(txn.get(b"k").unwrap(), Some(b"v".to_vec()));

        db.commit(txn).unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn own_delete_hides_committed_value() {
        let db = create_db();
        put(&db, "k", "v");

        let mut txn = db.begin().unwrap();
        txn.delete(b"k".to_vec()).unwrap();
        assert!(!txn.contains(b"k").unwrap());
        assert!(db.contains(b"k").unwrap());
        txn.commit().unwrap();
        assert!(!db.contains(b"k").unwrap());
    }

    #[test]
    fn reads_pass_through_to_latest_commit() {
        let db = create_db();
        let txn = db.begin().unwrap();
        put(&db, "k", "later");
        assert_eq!(txn.get(b"k").unwrap(), Some(b"later".to_vec()));
    }

    #[test]
    fn abort_discards_writes() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        txn.abort();
        assert_eq!(db.get(b"k").unwrap(), None);

        {
            let mut dropped = db.begin().unwrap();
            dropped.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        }
        assert_eq!(db.get(b"k").unwrap(), None);
    }

    #[test]
    fn transaction_closure_commits_on_ok() {
        let db = create_db();
        db.transaction(|txn| txn.put(b"a".to_vec(), b"1".to_vec()))
            .unwrap();
        let result: CoreResult<()> = db.transaction(|txn| {
            txn.put(b"b".to_vec(), b"2".to_vec())?;
            Err(CoreError::invalid_operation("stop"))
        });
        assert!(result.is_err());
        assert!(db.contains(b"a").unwrap());
        assert!(!db.contains(b"b").unwrap());
    }

    #[test]
    fn last_commit_wins() {
        let db = create_db();
        let mut first = db.begin().unwrap();
        let mut second = db.begin().unwrap();
        first.put(b"k".to_vec(), b"first".to_vec()).unwrap();
        second.put(b"k".to_vec(), b"second".to_vec()).unwrap();

        second.commit().unwrap();
        first.commit().unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"first".to_vec()));
    }

    #[test]
    fn snapshot_is_immutable() {
        let db = create_db();
        put(&db, "k", "old");
        let snap = db.snapshot().unwrap();

        put(&db, "k", "new");
        db.transaction(|txn| txn.put(b"other".to_vec(), b"x".to_vec()))
            .unwrap();

        assert_eq!(snap.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert!(!snap.contains(b"other").unwrap());
        assert_eq!(db.get(b"k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn snapshot_survives_checkpoint_and_close() {
        let db = create_db();
        put(&db, "k", "1");
        let snap = db.snapshot().unwrap();
        put(&db, "k", "2");
        put(&db, "k", "3");

        db.checkpoint().unwrap();
        assert_eq!(snap.get(b"k").unwrap(), Some(b"1".to_vec()));

        db.close().unwrap();
        assert_eq!(snap.get(b"k").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn checkpoint_reclaims_unpinned_versions() {
        let db = create_db();
        put(&db, "k", "1");
        let snap = db.snapshot().unwrap();
        put(&db, "k", "2");
        put(&db, "k", "3");

        db.checkpoint().unwrap();
        assert_eq!(db.version_count(), 3);
        assert_eq!(db.live_snapshots(), 1);

        drop(snap);
        assert_eq!(db.live_snapshots(), 0);
        db.checkpoint().unwrap();
        assert_eq!(db.version_count(), 1);
    }

    #[test]
    fn scan_prefix_merges_pending_writes() {
        let db = create_db();
        put(&db, "auth/a", "1");
        put(&db, "auth/b", "2");
        put(&db, "meta/x", "3");

        let mut txn = db.begin().unwrap();
        txn.delete(b"auth/a".to_vec()).unwrap();
        txn.put(b"auth/c".to_vec(), b"4".to_vec()).unwrap();

        let keys: Vec<_> = txn
            .scan_prefix(b"auth/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"auth/b".to_vec(), b"auth/c".to_vec()]);
        assert_eq!(db.scan_prefix(b"auth/").unwrap().len(), 2);
    }

    #[test]
    fn empty_commit_keeps_sequence() {
        let db = create_db();
        put(&db, "k", "v");
        let seq = db.begin().unwrap().commit().unwrap();
        assert_eq!(seq, SequenceNumber::new(1));
    }

    #[test]
    fn commit_after_close_fails() {
        let db = create_db();
        let mut txn = db.begin().unwrap();
        txn.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        db.close().unwrap();
        assert!(matches!(txn.commit(), Err(CoreError::DatabaseClosed)));
        assert!(matches!(db.begin(), Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn foreign_transaction_rejected() {
        let a = create_db();
        let b = create_db();
        let txn = b.begin().unwrap();
        assert!(a.commit(txn).is_err());
    }

    #[test]
    fn handles_are_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Database>();
        assert_sync::<Database>();
        assert_send::<Snapshot>();
        assert_sync::<Snapshot>();
        assert_send::<Transaction>();
    }

    #[test]
    fn shared_backend_replays_after_restart() {
        let backend = InMemoryBackend::new();
        {
            let db = Database::open_with_backend(Box::new(backend.clone()), Config::default())
                .unwrap();
            put(&db, "a", "1");
            put(&db, "b", "2");
        }
        let db = Database::open_with_backend(Box::new(backend), Config::default()).unwrap();
        assert_eq!(db.recovery_stats().batches_replayed, 2);
        assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(put(&db, "c", "3"), SequenceNumber::new(3));
    }

    mod persistence_tests {
        use super::*;
        use std::fs::OpenOptions;
        use std::io::Write;
        use tempfile::tempdir;

        #[test]
        fn data_survives_reopen() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("db");
            {
                let db = Database::open(&path).unwrap();
                put(&db, "k", "v");
            }
            let db = Database::open(&path).unwrap();
            assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        }

        #[test]
        fn second_open_is_locked() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("db");
            let _db = Database::open(&path).unwrap();
            assert!(matches!(
                Database::open(&path),
                Err(CoreError::DatabaseLocked)
            ));
        }

        #[test]
        fn checkpoint_then_more_commits() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("db");
            {
                let db = Database::open(&path).unwrap();
                put(&db, "a", "1");
                put(&db, "b", "2");
                db.checkpoint().unwrap();
                put(&db, "c", "3");
                db.transaction(|txn| txn.delete(b"a".to_vec())).unwrap();
            }
            let db = Database::open(&path).unwrap();
            let stats = db.recovery_stats();
            assert_eq!(stats.checkpoint_seq, Some(SequenceNumber::new(2)));
            assert_eq!(stats.batches_replayed, 2);
            assert_eq!(db.get(b"a").unwrap(), None);
            assert_eq!(db.get(b"c").unwrap(), Some(b"3".to_vec()));
            assert_eq!(db.committed_seq(), SequenceNumber::new(4));
        }

        #[test]
        fn torn_wal_tail_keeps_earlier_commits() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("db");
            {
                let db = Database::open(&path).unwrap();
                put(&db, "a", "1");
                put(&db, "b", "2");
            }
            let wal = path.join("wal.log");
            let full = std::fs::metadata(&wal).unwrap().len();
            let file = OpenOptions::new().write(true).open(&wal).unwrap();
            file.set_len(full - 3).unwrap();
            drop(file);

            let db = Database::open(&path).unwrap();
            assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
            assert_eq!(db.get(b"b").unwrap(), None);
            put(&db, "c", "3");
            drop(db);

            let db = Database::open(&path).unwrap();
            assert_eq!(db.get(b"c").unwrap(), Some(b"3".to_vec()));
        }

        #[test]
        fn corrupt_wal_refuses_open() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("db");
            {
                let db = Database::open(&path).unwrap();
                put(&db, "a", "1");
                put(&db, "b", "2");
            }
            let wal = path.join("wal.log");
            let mut bytes = std::fs::read(&wal).unwrap();
            bytes[14] ^= 0xFF;
            let mut file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&wal)
                .unwrap();
            file.write_all(&bytes).unwrap();
            drop(file);

            let err = Database::open(&path).unwrap_err();
            assert!(err.requires_reset());
        }

        #[test]
        fn auto_checkpoint_bounds_wal() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("db");
            let config = Config::default().checkpoint_wal_bytes(256);
            {
                let db = Database::open_with_config(&path, config.clone()).unwrap();
                for i in 0..20 {
                    put(&db, &format!("k{i}"), "some value bytes");
                }
                assert!(db.wal_size().unwrap() < 512);
            }
            let db = Database::open_with_config(&path, config).unwrap();
            assert_eq!(db.len(), 20);
            assert!(db.recovery_stats().checkpoint_seq.is_some());
        }
    }
}
