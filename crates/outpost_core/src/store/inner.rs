//! Shared store state behind every handle.

use crate::checkpoint::CheckpointImage;
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::store::table::VersionedTable;
use crate::types::{SequenceNumber, TransactionId, WriteOp};
use crate::wal::{WalManager, WalRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Result of replaying the checkpoint image and WAL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Sequence of the checkpoint image, if one was loaded.
    pub checkpoint_seq: Option<SequenceNumber>,
    /// Batches replayed from the WAL.
    pub batches_replayed: usize,
    /// Batches skipped because the image already covered them.
    pub batches_skipped: usize,
    /// Committed sequence after recovery.
    pub committed_seq: SequenceNumber,
}

/// Everything the `Database`, transactions and snapshots share.
pub(crate) struct StoreCore {
    config: Config,
    dir: Option<DatabaseDir>,
    wal: WalManager,
    table: RwLock<VersionedTable>,
    committed_seq: AtomicU64,
    next_txid: AtomicU64,
    /// Serialises append+apply and checkpointing.
    commit_lock: Mutex<()>,
    /// Live snapshot sequences with their pin counts.
    snapshots: Mutex<BTreeMap<SequenceNumber, usize>>,
    closed: AtomicBool,
    recovery: RecoveryStats,
}

impl StoreCore {
    /// Rebuilds the table from the checkpoint image and the WAL.
    pub(crate) fn open(
        config: Config,
        dir: Option<DatabaseDir>,
        wal: WalManager,
    ) -> CoreResult<Self> {
        let mut table = VersionedTable::new();
        let mut stats = RecoveryStats::default();
        let mut committed = SequenceNumber::default();

        if let Some(dir) = &dir {
            if let Some(bytes) = dir.load_checkpoint()? {
                let image = CheckpointImage::decode(&bytes)?;
                committed = image.sequence;
                stats.checkpoint_seq = Some(image.sequence);
                table.load(image.sequence, image.entries);
            }
        }

        let log = wal.recover()?;
        let mut max_txid = 0;
        for (offset, record) in log.records {
            match record {
                WalRecord::Batch {
                    txid,
                    sequence,
                    ops,
                } => {
                    max_txid = max_txid.max(txid.as_u64());
                    if sequence <= committed {
                        stats.batches_skipped += 1;
                        continue;
                    }
                    table.apply(sequence, &ops);
                    committed = sequence;
                    stats.batches_replayed += 1;
                }
                WalRecord::Checkpoint { sequence } => {
                    if sequence > committed {
                        return Err(CoreError::store_corruption(format!(
                            "WAL checkpoint marker at offset {offset} references {sequence} \
                             but the image only reaches {committed}"
                        )));
                    }
                }
            }
        }
        stats.committed_seq = committed;

        info!(
            committed = committed.as_u64(),
            replayed = stats.batches_replayed,
            skipped = stats.batches_skipped,
            "store recovered"
        );

        Ok(Self {
            config,
            dir,
            wal,
            table: RwLock::new(table),
            committed_seq: AtomicU64::new(committed.as_u64()),
            next_txid: AtomicU64::new(max_txid + 1),
            commit_lock: Mutex::new(()),
            snapshots: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
            recovery: stats,
        })
    }

    pub(crate) fn recovery(&self) -> RecoveryStats {
        self.recovery
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn dir(&self) -> Option<&DatabaseDir> {
        self.dir.as_ref()
    }

    pub(crate) fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    pub(crate) fn next_txid(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::DatabaseClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn get_at(&self, key: &[u8], at: SequenceNumber) -> Option<Vec<u8>> {
        self.table.read().get(key, at)
    }

    pub(crate) fn scan_prefix_at(
        &self,
        prefix: &[u8],
        at: SequenceNumber,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.table.read().scan_prefix(prefix, at)
    }

    /// Reads the latest committed value.
    ///
    /// The table lock is taken before the sequence is loaded so a concurrent
    /// apply cannot be half observed.
    pub(crate) fn get_latest(&self, key: &[u8]) -> Option<Vec<u8>> {
        let table = self.table.read();
        table.get(key, self.committed_seq())
    }

    pub(crate) fn scan_prefix_latest(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let table = self.table.read();
        table.scan_prefix(prefix, self.committed_seq())
    }

    pub(crate) fn live_count(&self) -> usize {
        let table = self.table.read();
        table.live_count(self.committed_seq())
    }

    pub(crate) fn version_count(&self) -> usize {
        self.table.read().version_count()
    }

    /// Makes one batch durable and visible.
    ///
    /// The batch is appended to the WAL first; the table only changes once
    /// the append succeeded, so a failed commit applies nothing.
    pub(crate) fn commit_batch(
        &self,
        txid: TransactionId,
        ops: Vec<WriteOp>,
    ) -> CoreResult<SequenceNumber> {
        self.ensure_open()?;
        if ops.is_empty() {
            return Ok(self.committed_seq());
        }

        let sequence = {
            let _guard = self.commit_lock.lock();
            let sequence = self.committed_seq().next();
            let record = WalRecord::Batch {
                txid,
                sequence,
                ops,
            };
            self.wal.append(&record)?;

            let mut table = self.table.write();
            if let WalRecord::Batch { ops, .. } = &record {
                table.apply(sequence, ops);
            }
            self.committed_seq.store(sequence.as_u64(), Ordering::SeqCst);
            sequence
        };

        debug!(txid = txid.as_u64(), seq = sequence.as_u64(), "committed");
        self.maybe_checkpoint();
        Ok(sequence)
    }

    fn maybe_checkpoint(&self) {
        if self.dir.is_none() {
            return;
        }
        let size = match self.wal.size() {
            Ok(size) => size,
            Err(_) => return,
        };
        if size >= self.config.checkpoint_wal_bytes {
            if let Err(err) = self.checkpoint() {
                warn!(error = %err, "automatic checkpoint failed");
            }
        }
    }

    /// Pins the latest committed sequence for a snapshot.
    pub(crate) fn pin_snapshot(&self) -> SequenceNumber {
        let mut pins = self.snapshots.lock();
        let seq = self.committed_seq();
        *pins.entry(seq).or_insert(0) += 1;
        seq
    }

    pub(crate) fn unpin_snapshot(&self, seq: SequenceNumber) {
        let mut pins = self.snapshots.lock();
        if let Some(count) = pins.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&seq);
            }
        }
    }

    pub(crate) fn live_snapshot_count(&self) -> usize {
        self.snapshots.lock().values().sum()
    }

    /// Writes a checkpoint image, empties the WAL, and reclaims versions no
    /// live snapshot can see.
    ///
    /// In-memory stores keep their WAL and only reclaim versions.
    pub(crate) fn checkpoint(&self) -> CoreResult<SequenceNumber> {
        self.ensure_open()?;
        let _guard = self.commit_lock.lock();
        let sequence = self.committed_seq();

        if let Some(dir) = &self.dir {
            let entries = self.table.read().scan_prefix(&[], sequence);
            let image = CheckpointImage { sequence, entries }.encode()?;
            dir.save_checkpoint(&image)?;
            self.wal.clear()?;
            self.wal.append(&WalRecord::Checkpoint { sequence })?;
        }

        let pins = self.snapshots.lock();
        let horizon = pins.keys().next().copied().unwrap_or(sequence);
        let removed = self.table.write().prune(horizon);
        drop(pins);

        info!(
            seq = sequence.as_u64(),
            reclaimed = removed,
            "checkpoint complete"
        );
        Ok(sequence)
    }

    pub(crate) fn flush(&self) -> CoreResult<()> {
        self.wal.flush()
    }

    pub(crate) fn wal_size(&self) -> CoreResult<u64> {
        self.wal.size()
    }

    /// Flushes the WAL and refuses further commits.
    pub(crate) fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.wal.flush()
    }
}

impl std::fmt::Debug for StoreCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCore")
            .field("committed_seq", &self.committed_seq())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
