//! Mutable transaction handles.

use crate::error::{CoreError, CoreResult};
use crate::store::inner::StoreCore;
use crate::store::read::DbRead;
use crate::types::{SequenceNumber, TransactionId, WriteOp};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted or abandoned.
    Aborted,
}

/// A mutable view of the store.
///
/// Writes are buffered in the handle: reads through the same handle see them
/// immediately, nobody else sees them until [`commit`](Self::commit). Keys
/// the transaction has not written read through to the latest committed
/// value. There is no conflict detection; when two transactions write the
/// same key the later commit wins.
///
/// Dropping an uncommitted transaction discards its writes.
pub struct Transaction {
    id: TransactionId,
    core: Arc<StoreCore>,
    /// Buffered writes; `None` is a delete.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, core: Arc<StoreCore>) -> Self {
        Self {
            id,
            core,
            writes: BTreeMap::new(),
            state: TransactionState::Active,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub(crate) fn belongs_to(&self, core: &Arc<StoreCore>) -> bool {
        Arc::ptr_eq(&self.core, core)
    }

    /// Reads `key`, preferring this transaction's own writes.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_usable()?;
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.core.get_latest(key)),
        }
    }

    /// Returns true if `key` has a value through this transaction.
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Buffers a put.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.ensure_usable()?;
        self.writes.insert(key.into(), Some(value.into()));
        Ok(())
    }

    /// Buffers a delete. Deleting a missing key is not an error.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> CoreResult<()> {
        self.ensure_usable()?;
        self.writes.insert(key.into(), None);
        Ok(())
    }

    /// Scans `prefix`, overlaying this transaction's writes on the latest
    /// committed state.
    pub fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_usable()?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.core.scan_prefix_latest(prefix).into_iter().collect();

        for (key, pending) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match pending {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// Returns the number of distinct keys written.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Returns the buffered writes in key order.
    pub fn pending_writes(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.writes
            .iter()
            .map(|(key, value)| (key.as_slice(), value.as_deref()))
    }

    /// Makes the buffered writes durable and visible as one batch.
    ///
    /// A transaction with no writes commits trivially and returns the
    /// current committed sequence.
    ///
    /// # Errors
    ///
    /// `StoreIo` if the medium rejects the write; nothing is applied and the
    /// transaction is abandoned. `DatabaseClosed` after close.
    pub fn commit(mut self) -> CoreResult<SequenceNumber> {
        self.ensure_usable()?;
        let ops = std::mem::take(&mut self.writes)
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => WriteOp::Put { key, value },
                None => WriteOp::Delete { key },
            })
            .collect();

        match self.core.commit_batch(self.id, ops) {
            Ok(seq) => {
                self.state = TransactionState::Committed;
                Ok(seq)
            }
            Err(err) => {
                self.state = TransactionState::Aborted;
                Err(err)
            }
        }
    }

    /// Discards the buffered writes.
    pub fn abort(mut self) {
        self.writes.clear();
        self.state = TransactionState::Aborted;
    }

    fn ensure_usable(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => self.core.ensure_open(),
            TransactionState::Committed => Err(CoreError::invalid_operation(
                "transaction already committed",
            )),
            TransactionState::Aborted => {
                Err(CoreError::invalid_operation("transaction already aborted"))
            }
        }
    }
}

impl DbRead for Transaction {
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Transaction::get(self, key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Transaction::scan_prefix(self, prefix)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active && !self.writes.is_empty() {
            debug!(
                txid = self.id.as_u64(),
                writes = self.writes.len(),
                "transaction dropped without commit"
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("writes", &self.writes.len())
            .finish()
    }
}
