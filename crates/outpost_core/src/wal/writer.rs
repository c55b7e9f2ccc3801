//! WAL writer.

use crate::error::CoreResult;
use crate::wal::record::{decode_log, DecodedLog, WalRecord};
use outpost_storage::StorageBackend;
use parking_lot::Mutex;
use tracing::warn;

/// Append-only access to the write-ahead log.
pub struct WalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

impl WalManager {
    /// Creates a new WAL manager.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Appends a record and, if configured, flushes it to the medium.
    ///
    /// On failure the log is truncated back to its previous length so a torn
    /// record can never sit in front of later ones.
    ///
    /// # Errors
    ///
    /// Returns `StoreIo` if the append or flush fails.
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        let data = record.encode()?;

        let mut backend = self.backend.lock();
        let before = backend.size()?;

        let result = backend.append(&data).and_then(|offset| {
            if self.sync_on_write {
                backend.flush()?;
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(truncate_err) = backend.truncate(before) {
                    warn!(error = %truncate_err, "failed to drop torn WAL tail");
                }
                Err(err.into())
            }
        }
    }

    /// Flushes all pending writes to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Returns the current WAL size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Reads every complete record.
    ///
    /// A torn tail is cut off so subsequent appends start on a record boundary.
    pub fn recover(&self) -> CoreResult<DecodedLog> {
        let mut backend = self.backend.lock();
        let data = backend.read_all()?;
        let log = decode_log(&data)?;

        if log.valid_len < data.len() as u64 {
            warn!(
                valid = log.valid_len,
                total = data.len(),
                "discarding torn WAL tail"
            );
            backend.truncate(log.valid_len)?;
        }

        Ok(log)
    }

    /// Empties the log once its contents live in a checkpoint image.
    pub fn clear(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        backend.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SequenceNumber, TransactionId, WriteOp};
    use outpost_storage::InMemoryBackend;

    fn batch(seq: u64) -> WalRecord {
        WalRecord::Batch {
            txid: TransactionId::new(seq),
            sequence: SequenceNumber::new(seq),
            ops: vec![WriteOp::Put {
                key: format!("k{seq}").into_bytes(),
                value: vec![seq as u8],
            }],
        }
    }

    #[test]
    fn append_then_recover() {
        let backend = InMemoryBackend::new();
        let wal = WalManager::new(Box::new(backend.clone()), true);

        wal.append(&batch(1)).unwrap();
        wal.append(&batch(2)).unwrap();

        let reopened = WalManager::new(Box::new(backend), true);
        let log = reopened.recover().unwrap();
        assert_eq!(log.records.len(), 2);
        assert_eq!(log.records[1].1, batch(2));
    }

    #[test]
    fn recover_truncates_torn_tail() {
        let backend = InMemoryBackend::new();
        let wal = WalManager::new(Box::new(backend.clone()), true);
        wal.append(&batch(1)).unwrap();
        let good_len = wal.size().unwrap();

        let mut raw = backend.clone();
        let torn = batch(2).encode().unwrap();
        raw.append(&torn[..torn.len() / 2]).unwrap();

        let log = wal.recover().unwrap();
        assert_eq!(log.records.len(), 1);
        assert_eq!(wal.size().unwrap(), good_len);

        wal.append(&batch(3)).unwrap();
        assert_eq!(wal.recover().unwrap().records.len(), 2);
    }

    #[test]
    fn clear_empties_log() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        wal.append(&batch(1)).unwrap();
        assert!(wal.size().unwrap() > 0);

        wal.clear().unwrap();
        assert_eq!(wal.size().unwrap(), 0);
        assert!(wal.recover().unwrap().records.is_empty());
    }
}
