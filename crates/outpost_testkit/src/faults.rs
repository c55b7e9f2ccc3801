//! Fault injection for the storage medium.
//!
//! [`FailingBackend`] wraps a backend and, when told to through its
//! [`FaultHandle`], fails appends outright or writes only part of them
//! before failing, the way a crash or full disk would.

use outpost_storage::{StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct FaultState {
    fail_appends: AtomicBool,
    fail_flush: AtomicBool,
    /// Bytes of the next append to write before failing; `usize::MAX` is off.
    tear_after: AtomicUsize,
    failures: AtomicUsize,
}

/// Switches faults on a [`FailingBackend`] after it has been moved into a
/// database.
#[derive(Debug, Clone)]
pub struct FaultHandle {
    state: Arc<FaultState>,
}

impl FaultHandle {
    /// Makes every append fail without writing.
    pub fn fail_appends(&self, fail: bool) {
        self.state.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes flush and sync fail.
    pub fn fail_flush(&self, fail: bool) {
        self.state.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Writes the first `bytes` of the next append, then fails it.
    pub fn tear_next_append(&self, bytes: usize) {
        self.state.tear_after.store(bytes, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn heal(&self) {
        self.fail_appends(false);
        self.fail_flush(false);
        self.state.tear_after.store(usize::MAX, Ordering::SeqCst);
    }

    /// Number of operations failed so far.
    pub fn failures(&self) -> usize {
        self.state.failures.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that fails on demand.
pub struct FailingBackend {
    inner: Box<dyn StorageBackend>,
    state: Arc<FaultState>,
}

impl FailingBackend {
    /// Wraps `inner`; starts healthy.
    pub fn new(inner: Box<dyn StorageBackend>) -> (Self, FaultHandle) {
        let state = Arc::new(FaultState {
            tear_after: AtomicUsize::new(usize::MAX),
            ..FaultState::default()
        });
        let handle = FaultHandle {
            state: Arc::clone(&state),
        };
        (Self { inner, state }, handle)
    }

    fn fail(&self, what: &str) -> StorageError {
        self.state.failures.fetch_add(1, Ordering::SeqCst);
        StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("simulated failure during {what}"),
        ))
    }
}

impl StorageBackend for FailingBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if self.state.fail_appends.load(Ordering::SeqCst) {
            return Err(self.fail("append"));
        }

        let tear = self.state.tear_after.swap(usize::MAX, Ordering::SeqCst);
        if tear < data.len() {
            if tear > 0 {
                self.inner.append(&data[..tear])?;
            }
            return Err(self.fail("partial append"));
        }

        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.state.fail_flush.load(Ordering::SeqCst) {
            return Err(self.fail("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.state.fail_flush.load(Ordering::SeqCst) {
            return Err(self.fail("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_storage::InMemoryBackend;

    #[test]
    fn healthy_until_told_otherwise() {
        let (mut backend, handle) = FailingBackend::new(Box::new(InMemoryBackend::new()));
        backend.append(b"abc").unwrap();

        handle.fail_appends(true);
        assert!(backend.append(b"def").is_err());
        assert_eq!(backend.size().unwrap(), 3);
        assert_eq!(handle.failures(), 1);

        handle.heal();
        backend.append(b"def").unwrap();
        assert_eq!(backend.size().unwrap(), 6);
    }

    #[test]
    fn tear_writes_prefix_once() {
        let memory = InMemoryBackend::new();
        let (mut backend, handle) = FailingBackend::new(Box::new(memory.clone()));

        handle.tear_next_append(2);
        assert!(backend.append(b"hello").is_err());
        assert_eq!(memory.data(), b"he".to_vec());

        backend.append(b"!").unwrap();
        assert_eq!(memory.data(), b"he!".to_vec());
    }
}
