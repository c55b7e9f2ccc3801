//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small pool so generated transactions collide,
//! which is where last-write-wins and snapshot behaviour get exercised.

use outpost_core::{AuthMetadata, WriteOp};
use proptest::prelude::*;

/// Strategy for keys from a pool of eight, under a few prefixes.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    (prop::sample::select(vec!["photo/", "episode/", "viewpoint/"]), 0u8..8)
        .prop_map(|(prefix, n)| format!("{prefix}{n}").into_bytes())
}

/// Strategy for value bytes.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for a single write.
pub fn write_op_strategy() -> impl Strategy<Value = WriteOp> {
    prop_oneof![
        3 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| WriteOp::Put { key, value }),
        1 => key_strategy().prop_map(|key| WriteOp::Delete { key }),
    ]
}

/// Strategy for the writes of one transaction.
pub fn batch_strategy(max_ops: usize) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_op_strategy(), 1..max_ops.max(2))
}

/// Strategy for a sequence of transactions.
pub fn history_strategy(
    max_batches: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Vec<WriteOp>>> {
    prop::collection::vec(batch_strategy(max_ops), 1..max_batches.max(2))
}

/// Strategy for auth records.
pub fn auth_strategy() -> impl Strategy<Value = AuthMetadata> {
    (
        any::<i64>(),
        any::<i64>(),
        "[A-Za-z0-9]{0,24}",
        "[A-Za-z0-9]{0,24}",
    )
        .prop_map(|(user_id, device_id, user_cookie, xsrf_cookie)| AuthMetadata {
            user_id,
            device_id,
            user_cookie,
            xsrf_cookie,
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_use_known_prefixes(key in key_strategy()) {
            let key = String::from_utf8(key).unwrap();
            prop_assert!(
                key.starts_with("photo/") || key.starts_with("episode/") || key.starts_with("viewpoint/")
            );
        }

        #[test]
        fn batches_are_never_empty(batch in batch_strategy(4)) {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() < 4);
        }
    }
}
