//! Immutable tables
//!
//! A flush freezes a memtable into a table: versions grouped into blocks, a
//! sparse index of block bounds, and an optional filter over the table's keys.
//!
//! ```text
//! +------------------+
//! | Blocks           |  <- Versions in internal order, `block_entries` each
//! +------------------+
//! | Index            |  <- One bound per block: separator / successor key
//! +------------------+
//! | Filter           |  <- Built by the column family's filter policy
//! +------------------+
//! ```
//!
//! Block bounds come from the comparator's `find_shortest_separator` and
//! `find_short_successor`, so a lookup only searches the one block whose
//! bound is the first `>=` the key.

use crate::memtable::{versions_of, Version};
use crate::options::Options;
use rockbind_core::{Comparator, FilterBitsReader, FilterPolicy};
use std::cmp::Ordering;
use std::sync::Arc;

/// Index entry pointing to a block
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Every key in the block is `<=` this bound
    pub bound: Vec<u8>,
    pub start: usize,
    pub end: usize,
}

enum TableFilter {
    /// Full-filter contents paired with their reader
    Full(Box<dyn FilterBitsReader>),
    /// Contents from `create_filter`, queried with `key_may_match`
    Classic {
        policy: Arc<dyn FilterPolicy>,
        contents: Vec<u8>,
    },
}

/// Immutable sorted table
pub struct Table {
    id: u64,
    cmp: Arc<dyn Comparator>,
    versions: Vec<Version>,
    index: Vec<IndexEntry>,
    filter: Option<TableFilter>,
}

impl Table {
    /// Build a table from versions already in internal order.
    pub fn build(id: u64, versions: Vec<Version>, options: &Options) -> Self {
        let cmp = Arc::clone(&options.comparator);
        let index = build_index(cmp.as_ref(), &versions, options.block_entries.max(1));
        let filter = options
            .filter_policy
            .as_ref()
            .and_then(|policy| build_filter(cmp.as_ref(), policy, &versions));

        tracing::debug!(
            table = id,
            versions = versions.len(),
            blocks = index.len(),
            filtered = filter.is_some(),
            "built table"
        );

        Self {
            id,
            cmp,
            versions,
            index,
            filter,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns false only if the filter rules `key` out.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        match &self.filter {
            None => true,
            Some(TableFilter::Full(reader)) => reader.may_match(key),
            Some(TableFilter::Classic { policy, contents }) => policy.key_may_match(key, contents),
        }
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// All versions of `key`, newest first. Does not consult the filter.
    pub fn get(&self, key: &[u8]) -> &[Version] {
        let block = self
            .index
            .partition_point(|e| self.cmp.compare(&e.bound, key) == Ordering::Less);
        match self.index.get(block) {
            Some(entry) => versions_of(
                self.cmp.as_ref(),
                &self.versions[entry.start..entry.end],
                key,
            ),
            None => &[],
        }
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }
}

/// Split into blocks of about `block_entries` versions without splitting the
/// versions of one key, then derive a short bound per block.
fn build_index(
    cmp: &dyn Comparator,
    versions: &[Version],
    block_entries: usize,
) -> Vec<IndexEntry> {
    let mut index = Vec::new();
    let mut start = 0;
    while start < versions.len() {
        let mut end = (start + block_entries).min(versions.len());
        while end < versions.len()
            && cmp.compare(&versions[end - 1].key, &versions[end].key) == Ordering::Equal
        {
            end += 1;
        }
        index.push(IndexEntry {
            bound: Vec::new(),
            start,
            end,
        });
        start = end;
    }

    let count = index.len();
    for i in 0..count {
        let last = &versions[index[i].end - 1].key;
        let bound = if i + 1 < count {
            let next = &versions[index[i + 1].start].key;
            shortened(cmp, last, cmp.find_shortest_separator(last, next), Some(next))
        } else {
            shortened(cmp, last, cmp.find_short_successor(last), None)
        };
        index[i].bound = bound;
    }
    index
}

/// Accept a comparator-proposed bound only if it keeps the index correct.
fn shortened(
    cmp: &dyn Comparator,
    last: &[u8],
    proposed: Option<Vec<u8>>,
    next: Option<&[u8]>,
) -> Vec<u8> {
    match proposed {
        Some(bound)
            if cmp.compare(&bound, last) != Ordering::Less
                && next.map_or(true, |n| cmp.compare(&bound, n) == Ordering::Less) =>
        {
            bound
        }
        Some(_) => {
            tracing::warn!(comparator = cmp.name(), "ignoring out-of-order block bound");
            last.to_vec()
        }
        None => last.to_vec(),
    }
}

fn build_filter(
    cmp: &dyn Comparator,
    policy: &Arc<dyn FilterPolicy>,
    versions: &[Version],
) -> Option<TableFilter> {
    let mut keys: Vec<&[u8]> = Vec::new();
    for v in versions {
        let duplicate = keys
            .last()
            .map_or(false, |prev| cmp.compare(prev, &v.key) == Ordering::Equal);
        if !duplicate {
            keys.push(&v.key);
        }
    }

    if let Some(mut builder) = policy.bits_builder() {
        for key in &keys {
            builder.add_key(key);
        }
        let contents = builder.finish();
        return match policy.bits_reader(&contents) {
            Some(reader) => Some(TableFilter::Full(reader)),
            None => {
                tracing::warn!(
                    policy = policy.name(),
                    "filter policy built contents it cannot read"
                );
                None
            }
        };
    }

    let contents = policy.create_filter(&keys);
    Some(TableFilter::Classic {
        policy: Arc::clone(policy),
        contents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::MemtableEntry;
    use rockbind_core::{BloomFilterPolicy, BytewiseComparator};

    fn versions(keys: &[&str]) -> Vec<Version> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| {
                Version::new(
                    k.as_bytes().to_vec(),
                    i as u64 + 1,
                    MemtableEntry::Value(k.as_bytes().to_vec()),
                )
            })
            .collect()
    }

    struct ExactSet;

    impl FilterPolicy for ExactSet {
        fn name(&self) -> &str {
            "exact"
        }

        fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
            keys.join(&b'|')
        }

        fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
            filter.split(|b| *b == b'|').any(|k| k == key)
        }
    }

    #[test]
    fn test_block_index_uses_short_bounds() {
        let options = Options {
            block_entries: 2,
            ..Options::default()
        };
        let table = Table::build(1, versions(&["apple", "apricot", "cherry", "date"]), &options);

        assert_eq!(table.block_count(), 2);
        // Separator between "apricot" and "cherry"
        assert_eq!(table.index()[0].bound, b"b".to_vec());
        // Successor of "date"
        assert_eq!(table.index()[1].bound, b"e".to_vec());

        assert_eq!(table.get(b"cherry")[0].key, b"cherry".to_vec());
        assert_eq!(table.get(b"apple")[0].key, b"apple".to_vec());
        assert!(table.get(b"blueberry").is_empty());
        assert!(table.get(b"zebra").is_empty());
    }

    #[test]
    fn test_versions_of_one_key_share_a_block() {
        let mut vs = vec![
            Version::new(b"a".to_vec(), 3, MemtableEntry::Merge(b"x".to_vec())),
            Version::new(b"a".to_vec(), 2, MemtableEntry::Merge(b"y".to_vec())),
            Version::new(b"a".to_vec(), 1, MemtableEntry::Value(b"z".to_vec())),
        ];
        vs.push(Version::new(b"b".to_vec(), 4, MemtableEntry::Tombstone));
        let options = Options {
            block_entries: 1,
            ..Options::default()
        };
        let table = Table::build(1, vs, &options);

        assert_eq!(table.block_count(), 2);
        assert_eq!(table.get(b"a").len(), 3);
    }

    #[test]
    fn test_classic_filter() {
        let options = Options {
            filter_policy: Some(Arc::new(ExactSet)),
            ..Options::default()
        };
        let table = Table::build(1, versions(&["k1", "k2"]), &options);

        assert!(table.has_filter());
        assert!(table.may_contain(b"k1"));
        assert!(!table.may_contain(b"k3"));
    }

    #[test]
    fn test_builtin_bloom_filter() {
        let options = Options {
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            ..Options::default()
        };
        let table = Table::build(1, versions(&["k1", "k2", "k3"]), &options);

        assert!(table.has_filter());
        assert!(["k1", "k2", "k3"].iter().all(|k| table.may_contain(k.as_bytes())));
        let misses = (0..100)
            .filter(|i| table.may_contain(format!("other{}", i).as_bytes()))
            .count();
        assert!(misses < 10);
    }

    #[test]
    fn test_bad_separator_is_ignored() {
        struct Liar;

        impl Comparator for Liar {
            fn name(&self) -> &str {
                "liar"
            }

            fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
                BytewiseComparator.compare(a, b)
            }

            fn find_shortest_separator(&self, _start: &[u8], _limit: &[u8]) -> Option<Vec<u8>> {
                Some(b"zzz".to_vec())
            }
        }

        let options = Options {
            block_entries: 1,
            comparator: Arc::new(Liar),
            ..Options::default()
        };
        let table = Table::build(1, versions(&["a", "b"]), &options);
        assert_eq!(table.index()[0].bound, b"a".to_vec());
        assert_eq!(table.get(b"b").len(), 1);
    }
}
