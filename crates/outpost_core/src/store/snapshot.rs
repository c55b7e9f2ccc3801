//! Read-only point-in-time handles.

use crate::error::CoreResult;
use crate::store::inner::StoreCore;
use crate::store::read::DbRead;
use crate::types::SequenceNumber;
use std::sync::Arc;

/// Releases the pinned sequence when the last clone goes away.
struct SnapshotPin {
    core: Arc<StoreCore>,
    seq: SequenceNumber,
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.core.unpin_snapshot(self.seq);
    }
}

/// An immutable view of the store as of one committed sequence.
///
/// Later commits never change what a snapshot returns. Clones share the same
/// pin; the versions it sees stay reachable until the last clone is dropped,
/// even if the [`Database`](crate::Database) is closed first.
#[derive(Clone)]
pub struct Snapshot {
    pin: Arc<SnapshotPin>,
}

impl Snapshot {
    pub(crate) fn new(core: Arc<StoreCore>) -> Self {
        let seq = core.pin_snapshot();
        Self {
            pin: Arc::new(SnapshotPin { core, seq }),
        }
    }

    /// Returns the sequence this snapshot observes.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.pin.seq
    }

    /// Reads `key` as of the snapshot.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.pin.core.get_at(key, self.pin.seq))
    }

    /// Returns true if `key` had a value as of the snapshot.
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Scans `prefix` as of the snapshot.
    pub fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.pin.core.scan_prefix_at(prefix, self.pin.seq))
    }
}

impl DbRead for Snapshot {
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Snapshot::get(self, key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Snapshot::scan_prefix(self, prefix)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("seq", &self.pin.seq)
            .finish()
    }
}
