//! Read access shared by every handle kind.

use crate::error::CoreResult;

/// Read operations available on a database, a transaction or a snapshot.
///
/// Collaborators that only read take `&impl DbRead` (or `&dyn DbRead`) and
/// work against whichever handle the caller holds.
pub trait DbRead {
    /// Returns the value stored under `key`.
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>>;

    /// Returns true if `key` has a value.
    fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>>;
}
