//! Merge operand resolution.

use crate::memtable::{MemtableEntry, Version};
use rockbind_core::{Comparator, MergeOperator, Result, Status};
use std::cmp::Ordering;

/// Resolve the versions of one key (newest first, already visible to the
/// reader) into its value.
///
/// Stops at the first value or tombstone; merge operands above it are folded
/// with `full_merge`, oldest first.
pub(crate) fn resolve<'a, I>(
    key: &[u8],
    versions: I,
    merge_operator: Option<&dyn MergeOperator>,
) -> Result<Option<Vec<u8>>>
where
    I: IntoIterator<Item = &'a Version>,
{
    let mut operands: Vec<&[u8]> = Vec::new();
    let mut base: Option<&[u8]> = None;
    for version in versions {
        match &version.entry {
            MemtableEntry::Value(v) => {
                base = Some(v);
                break;
            }
            MemtableEntry::Tombstone => break,
            MemtableEntry::Merge(op) => operands.push(op),
        }
    }

    if operands.is_empty() {
        return Ok(base.map(<[u8]>::to_vec));
    }

    let op = merge_operator.ok_or_else(|| {
        Status::invalid_argument("merge_operator is not properly initialized")
    })?;
    operands.reverse();
    match op.full_merge(key, base, &operands) {
        Some(value) => Ok(Some(value)),
        None => {
            tracing::error!(merge_operator = op.name(), "full merge failed");
            Err(Status::corruption(format!("merge operator {} failed", op.name())).into())
        }
    }
}

/// Trim the versions of one key for a flush when no snapshot pins history:
/// drop everything older than the first value or tombstone, and collapse a
/// run of merge operands with `partial_merge_multi`.
pub(crate) fn collapse(
    key_versions: Vec<Version>,
    merge_operator: Option<&dyn MergeOperator>,
) -> Vec<Version> {
    let cut = key_versions
        .iter()
        .position(|v| !v.entry.is_merge())
        .map_or(key_versions.len(), |i| i + 1);
    let mut kept: Vec<Version> = key_versions.into_iter().take(cut).collect();

    let run = kept.iter().take_while(|v| v.entry.is_merge()).count();
    let Some(op) = merge_operator else {
        return kept;
    };
    if run < 2 {
        return kept;
    }

    let key = kept[0].key.clone();
    let sequence = kept[0].sequence;
    let combined = {
        let operands: Vec<&[u8]> = kept[..run]
            .iter()
            .rev()
            .filter_map(|v| match &v.entry {
                MemtableEntry::Merge(op) => Some(op.as_slice()),
                _ => None,
            })
            .collect();
        op.partial_merge_multi(&key, &operands)
    };

    if let Some(operand) = combined {
        kept.splice(
            ..run,
            std::iter::once(Version::new(key, sequence, MemtableEntry::Merge(operand))),
        );
    }
    kept
}

/// Split versions in internal order into per-key groups.
pub(crate) fn group_by_key(cmp: &dyn Comparator, versions: Vec<Version>) -> Vec<Vec<Version>> {
    let mut groups: Vec<Vec<Version>> = Vec::new();
    for version in versions {
        let same_key = groups
            .last()
            .map_or(false, |g| cmp.compare(&g[0].key, &version.key) == Ordering::Equal);
        if same_key {
            if let Some(group) = groups.last_mut() {
                group.push(version);
                continue;
            }
        }
        groups.push(vec![version]);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use rockbind_core::BytewiseComparator;

    struct Concat;

    impl MergeOperator for Concat {
        fn name(&self) -> &str {
            "concat"
        }

        fn full_merge(
            &self,
            _key: &[u8],
            existing: Option<&[u8]>,
            ops: &[&[u8]],
        ) -> Option<Vec<u8>> {
            let mut out = existing.unwrap_or_default().to_vec();
            for op in ops {
                out.extend_from_slice(op);
            }
            Some(out)
        }

        fn partial_merge(&self, _key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
            Some([left, right].concat())
        }
    }

    fn merge(seq: u64, op: &str) -> Version {
        Version::new(b"k".to_vec(), seq, MemtableEntry::Merge(op.as_bytes().to_vec()))
    }

    #[test]
    fn test_resolve_folds_oldest_first() {
        let versions = vec![
            merge(4, "c"),
            merge(3, "b"),
            Version::new(b"k".to_vec(), 2, MemtableEntry::Value(b"a".to_vec())),
            Version::new(b"k".to_vec(), 1, MemtableEntry::Value(b"old".to_vec())),
        ];
        let value = resolve(b"k", &versions, Some(&Concat)).unwrap();
        assert_eq!(value, Some(b"abc".to_vec()));
    }

    #[test]
    fn test_resolve_tombstone_and_missing_operator() {
        let deleted = vec![Version::new(b"k".to_vec(), 1, MemtableEntry::Tombstone)];
        assert_eq!(resolve(b"k", &deleted, None).unwrap(), None);

        let pending = vec![merge(1, "x")];
        let err = resolve(b"k", &pending, None).unwrap_err();
        assert!(err.status().unwrap().is_invalid_argument());
    }

    #[test]
    fn test_collapse_partial_merges_run() {
        let versions = vec![
            merge(5, "c"),
            merge(4, "b"),
            Version::new(b"k".to_vec(), 3, MemtableEntry::Value(b"a".to_vec())),
            Version::new(b"k".to_vec(), 2, MemtableEntry::Value(b"gone".to_vec())),
        ];
        let out = collapse(versions, Some(&Concat));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sequence, 5);
        assert_eq!(out[0].entry, MemtableEntry::Merge(b"bc".to_vec()));
        assert_eq!(out[1].entry, MemtableEntry::Value(b"a".to_vec()));
    }

    #[test]
    fn test_group_by_key() {
        let versions = vec![
            Version::new(b"a".to_vec(), 2, MemtableEntry::Tombstone),
            Version::new(b"a".to_vec(), 1, MemtableEntry::Tombstone),
            Version::new(b"b".to_vec(), 3, MemtableEntry::Tombstone),
        ];
        let groups = group_by_key(&BytewiseComparator, versions);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
    }
}
