//! Local operation-id allocator.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::keys;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Hands out strictly increasing operation ids scoped to the local store.
///
/// Ids let a disconnected client originate operations that can later be
/// matched with what the server assigns. The next id is made durable before
/// the current one is returned, so a crash right after allocation never
/// leads to reuse. The first id of a fresh store is 1.
#[derive(Debug)]
pub struct OpIdAllocator {
    db: Arc<Database>,
    /// Next id to hand out; loaded from the store on first use.
    next: Mutex<Option<i64>>,
}

impl OpIdAllocator {
    /// Creates an allocator over `db`.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            next: Mutex::new(None),
        }
    }

    /// Returns a fresh operation id.
    ///
    /// # Errors
    ///
    /// - `StoreIo` if persisting the counter fails; the counter does not advance
    /// - `IntegrityViolation` / `Codec` if the persisted counter is damaged
    pub fn next_local_operation_id(&self) -> CoreResult<i64> {
        let mut next = self.next.lock();
        let id = match *next {
            Some(id) => id,
            None => load_counter(self.db.as_ref())?,
        };
        let following = id
            .checked_add(1)
            .ok_or_else(|| CoreError::integrity_violation("operation id counter exhausted"))?;

        let mut txn = self.db.begin()?;
        keys::put_record(&mut txn, keys::NEXT_OP_ID, &following)?;
        txn.commit()?;

        *next = Some(following);
        debug!(op_id = id, "allocated local operation id");
        Ok(id)
    }

    /// Returns the id the next call will hand out, without allocating.
    pub fn peek(&self) -> CoreResult<i64> {
        let next = self.next.lock();
        match *next {
            Some(id) => Ok(id),
            None => load_counter(self.db.as_ref()),
        }
    }
}

fn load_counter(db: &Database) -> CoreResult<i64> {
    match keys::get_record::<i64>(db, keys::NEXT_OP_ID)? {
        None => Ok(1),
        Some(id) if id >= 1 => Ok(id),
        Some(id) => Err(CoreError::integrity_violation(format!(
            "operation id counter holds {id}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn first_id_is_one() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ids = OpIdAllocator::new(db);
        assert_eq!(ids.peek().unwrap(), 1);
        assert_eq!(ids.next_local_operation_id().unwrap(), 1);
        assert_eq!(ids.next_local_operation_id().unwrap(), 2);
        assert_eq!(ids.peek().unwrap(), 3);
    }

    #[test]
    fn counter_is_persisted_before_return() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ids = OpIdAllocator::new(Arc::clone(&db));
        let id = ids.next_local_operation_id().unwrap();
        assert_eq!(
            keys::get_record::<i64>(db.as_ref(), keys::NEXT_OP_ID).unwrap(),
            Some(id + 1)
        );

        // A second allocator over the same store continues the sequence.
        let again = OpIdAllocator::new(db);
        assert_eq!(again.next_local_operation_id().unwrap(), id + 1);
    }

    #[test]
    fn concurrent_callers_get_distinct_ids() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ids = Arc::new(OpIdAllocator::new(db));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || {
                    let mut mine = Vec::new();
                    for _ in 0..50 {
                        mine.push(ids.next_local_operation_id().unwrap());
                    }
                    mine
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let mine = handle.join().unwrap();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
            all.extend(mine);
        }
        assert_eq!(all.len(), 400);
        assert_eq!(all.iter().max(), Some(&400));
    }

    #[test]
    fn damaged_counter_is_refused() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.transaction(|txn| keys::put_record(txn, keys::NEXT_OP_ID, &-4i64))
            .unwrap();
        let ids = OpIdAllocator::new(db);
        assert!(matches!(
            ids.next_local_operation_id(),
            Err(CoreError::IntegrityViolation { .. })
        ));
    }
}
