//! Multi-version ordered table.

use crate::types::{SequenceNumber, WriteOp};
use std::collections::BTreeMap;
use std::ops::Bound;

/// One committed value of a key. `None` is a tombstone.
#[derive(Debug, Clone)]
struct Version {
    seq: SequenceNumber,
    value: Option<Vec<u8>>,
}

/// Ordered map from key to its committed versions, oldest first.
///
/// A read at sequence `s` sees the newest version with `seq <= s`.
#[derive(Debug, Default)]
pub(crate) struct VersionedTable {
    rows: BTreeMap<Vec<u8>, Vec<Version>>,
}

impl VersionedTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Loads a checkpoint image; every entry becomes visible at `seq`.
    pub(crate) fn load(&mut self, seq: SequenceNumber, entries: Vec<(Vec<u8>, Vec<u8>)>) {
        for (key, value) in entries {
            self.rows.insert(
                key,
                vec![Version {
                    seq,
                    value: Some(value),
                }],
            );
        }
    }

    /// Applies one committed batch at `seq`.
    pub(crate) fn apply(&mut self, seq: SequenceNumber, ops: &[WriteOp]) {
        for op in ops {
            let (key, value) = match op {
                WriteOp::Put { key, value } => (key, Some(value.clone())),
                WriteOp::Delete { key } => (key, None),
            };
            let versions = self.rows.entry(key.clone()).or_default();
            match versions.last_mut() {
                Some(last) if last.seq == seq => last.value = value,
                _ => versions.push(Version { seq, value }),
            }
        }
    }

    /// Returns the value of `key` visible at `at`.
    pub(crate) fn get(&self, key: &[u8], at: SequenceNumber) -> Option<Vec<u8>> {
        self.rows
            .get(key)
            .and_then(|versions| visible(versions, at))
            .cloned()
    }

    /// Returns every live entry under `prefix` visible at `at`, in key order.
    pub(crate) fn scan_prefix(&self, prefix: &[u8], at: SequenceNumber) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.rows
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter_map(|(key, versions)| visible(versions, at).map(|v| (key.clone(), v.clone())))
            .collect()
    }

    /// Drops versions no reader at or above `horizon` can observe.
    ///
    /// For each key the newest version at or below `horizon` is kept along
    /// with everything newer. A tombstone left as the oldest version is
    /// removed too, and keys with no versions left disappear.
    pub(crate) fn prune(&mut self, horizon: SequenceNumber) -> usize {
        let mut removed = 0;
        self.rows.retain(|_, versions| {
            let keep_from = versions
                .iter()
                .rposition(|v| v.seq <= horizon)
                .unwrap_or(0);
            removed += keep_from;
            versions.drain(..keep_from);

            if versions
                .first()
                .is_some_and(|v| v.value.is_none() && v.seq <= horizon)
            {
                versions.remove(0);
                removed += 1;
            }
            !versions.is_empty()
        });
        removed
    }

    /// Number of live keys visible at `at`.
    pub(crate) fn live_count(&self, at: SequenceNumber) -> usize {
        self.rows
            .values()
            .filter(|versions| visible(versions, at).is_some())
            .count()
    }

    /// Total number of retained versions, tombstones included.
    pub(crate) fn version_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }
}

fn visible(versions: &[Version], at: SequenceNumber) -> Option<&Vec<u8>> {
    versions
        .iter()
        .rev()
        .find(|v| v.seq <= at)
        .and_then(|v| v.value.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str, value: &str) -> WriteOp {
        WriteOp::Put {
            key: key.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
        }
    }

    fn del(key: &str) -> WriteOp {
        WriteOp::Delete {
            key: key.as_bytes().to_vec(),
        }
    }

    fn seq(n: u64) -> SequenceNumber {
        SequenceNumber::new(n)
    }

    #[test]
    fn reads_respect_sequence() {
        let mut table = VersionedTable::new();
        table.apply(seq(1), &[put("a", "1")]);
        table.apply(seq(2), &[put("a", "2")]);
        table.apply(seq(3), &[del("a")]);

        assert_eq!(table.get(b"a", seq(0)), None);
        assert_eq!(table.get(b"a", seq(1)), Some(b"1".to_vec()));
        assert_eq!(table.get(b"a", seq(2)), Some(b"2".to_vec()));
        assert_eq!(table.get(b"a", seq(3)), None);
    }

    #[test]
    fn same_batch_last_write_wins() {
        let mut table = VersionedTable::new();
        table.apply(seq(1), &[put("a", "1"), put("a", "2")]);
        assert_eq!(table.get(b"a", seq(1)), Some(b"2".to_vec()));
        assert_eq!(table.version_count(), 1);
    }

    #[test]
    fn scan_prefix_stops_at_prefix_end() {
        let mut table = VersionedTable::new();
        table.apply(
            seq(1),
            &[put("auth/a", "1"), put("auth/b", "2"), put("authz", "3"), put("meta/x", "4")],
        );
        table.apply(seq(2), &[del("auth/a")]);

        let at1: Vec<_> = table.scan_prefix(b"auth/", seq(1));
        assert_eq!(at1.len(), 2);
        let at2 = table.scan_prefix(b"auth/", seq(2));
        assert_eq!(at2, vec![(b"auth/b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn prune_keeps_visible_versions() {
        let mut table = VersionedTable::new();
        table.apply(seq(1), &[put("a", "1"), put("b", "1")]);
        table.apply(seq(2), &[put("a", "2"), del("b")]);
        table.apply(seq(3), &[put("a", "3")]);

        let removed = table.prune(seq(2));
        assert_eq!(removed, 3);
        assert_eq!(table.get(b"a", seq(2)), Some(b"2".to_vec()));
        assert_eq!(table.get(b"a", seq(3)), Some(b"3".to_vec()));
        assert_eq!(table.get(b"b", seq(3)), None);
        assert_eq!(table.version_count(), 2);
    }

    #[test]
    fn live_count_ignores_tombstones() {
        let mut table = VersionedTable::new();
        table.load(seq(5), vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
        table.apply(seq(6), &[del("a")]);
        assert_eq!(table.live_count(seq(5)), 2);
        assert_eq!(table.live_count(seq(6)), 1);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn op_strategy() -> impl Strategy<Value = WriteOp> {
            let key = proptest::sample::select(vec!["a", "b", "c", "d"]);
            prop_oneof![
                (key.clone(), "[a-z]{0,3}").prop_map(|(k, v)| put(k, &v)),
                key.prop_map(del),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn pruned_table_matches_model_above_horizon(
                batches in proptest::collection::vec(proptest::collection::vec(op_strategy(), 1..4), 1..12),
                horizon_pick in 0usize..12,
            ) {
                let mut table = VersionedTable::new();
                let mut model = BTreeMap::new();
                let mut views = Vec::new();

                for (i, ops) in batches.iter().enumerate() {
                    let at = seq(i as u64 + 1);
                    table.apply(at, ops);
                    for op in ops {
                        match op {
                            WriteOp::Put { key, value } => { model.insert(key.clone(), value.clone()); }
                            WriteOp::Delete { key } => { model.remove(key); }
                        }
                    }
                    views.push(model.clone());
                }

                let horizon = (horizon_pick % batches.len()) as u64 + 1;
                table.prune(seq(horizon));

                for (i, view) in views.iter().enumerate().skip(horizon as usize - 1) {
                    let expected: Vec<_> = view.clone().into_iter().collect();
                    prop_assert_eq!(table.scan_prefix(b"", seq(i as u64 + 1)), expected);
                }
            }
        }
    }
}
