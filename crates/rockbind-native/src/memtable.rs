//! Memtable - In-memory sorted write buffer
//!
//! The memtable holds recent writes before they are flushed into an
//! immutable table. Keys are ordered by the column family's comparator, so
//! the buffer is a sorted vector searched through comparator upcalls rather
//! than a `BTreeMap` over raw bytes. Each write is a separate version tagged
//! with its sequence number; versions of one key sit next to each other,
//! newest first.

use rockbind_core::Comparator;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Entry value in the memtable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemtableEntry {
    /// A live value
    Value(Vec<u8>),
    /// A tombstone marking deletion
    Tombstone,
    /// A merge operand waiting to be folded
    Merge(Vec<u8>),
}

impl MemtableEntry {
    /// Returns the size of this entry in bytes
    pub fn size(&self) -> usize {
        match self {
            MemtableEntry::Value(v) | MemtableEntry::Merge(v) => v.len() + 1, // +1 for type tag
            MemtableEntry::Tombstone => 1,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, MemtableEntry::Merge(_))
    }
}

/// One write to one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub key: Vec<u8>,
    pub sequence: u64,
    pub entry: MemtableEntry,
}

impl Version {
    pub fn new(key: Vec<u8>, sequence: u64, entry: MemtableEntry) -> Self {
        Self {
            key,
            sequence,
            entry,
        }
    }
}

/// Internal ordering: user key ascending, then sequence descending.
pub(crate) fn version_order(cmp: &dyn Comparator, a: &Version, b: &Version) -> Ordering {
    cmp.compare(&a.key, &b.key)
        .then_with(|| b.sequence.cmp(&a.sequence))
}

/// Slice of `versions` (sorted by [`version_order`]) holding `key`.
pub(crate) fn versions_of<'a>(
    cmp: &dyn Comparator,
    versions: &'a [Version],
    key: &[u8],
) -> &'a [Version] {
    let start = versions.partition_point(|v| cmp.compare(&v.key, key) == Ordering::Less);
    let len = versions[start..].partition_point(|v| cmp.compare(&v.key, key) == Ordering::Equal);
    &versions[start..start + len]
}

/// Memtable - an in-memory sorted write buffer
pub struct Memtable {
    cmp: Arc<dyn Comparator>,
    versions: Vec<Version>,
    /// Approximate size in bytes (for flush threshold checking)
    size_bytes: usize,
}

impl Memtable {
    /// Creates a new empty Memtable ordered by `cmp`
    pub fn new(cmp: Arc<dyn Comparator>) -> Self {
        Self {
            cmp,
            versions: Vec::new(),
            size_bytes: 0,
        }
    }

    /// Adds a version. Sequence numbers must be unique.
    pub fn insert(&mut self, key: Vec<u8>, sequence: u64, entry: MemtableEntry) {
        self.size_bytes += key.len() + entry.size() + 8;
        let version = Version::new(key, sequence, entry);
        let pos = self
            .versions
            .partition_point(|v| version_order(self.cmp.as_ref(), v, &version) == Ordering::Less);
        self.versions.insert(pos, version);
    }

    /// All versions of `key`, newest first
    pub fn get(&self, key: &[u8]) -> &[Version] {
        versions_of(self.cmp.as_ref(), &self.versions, key)
    }

    /// Returns the approximate size of the memtable in bytes
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Returns the number of versions in the memtable
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if the memtable is empty
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Returns an iterator over all versions in internal order
    pub fn iter(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter()
    }

    /// All versions in internal order
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn comparator(&self) -> &Arc<dyn Comparator> {
        &self.cmp
    }

    /// Consumes the memtable and returns all versions in internal order
    pub fn drain(self) -> Vec<Version> {
        self.versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rockbind_core::{BytewiseComparator, ReverseBytewiseComparator};

    fn memtable() -> Memtable {
        Memtable::new(Arc::new(BytewiseComparator))
    }

    #[test]
    fn test_memtable_new() {
        let mt = memtable();
        assert!(mt.is_empty());
        assert_eq!(mt.len(), 0);
        assert_eq!(mt.size_bytes(), 0);
    }

    #[test]
    fn test_memtable_versions_newest_first() {
        let mut mt = memtable();
        mt.insert(b"key".to_vec(), 1, MemtableEntry::Value(b"v1".to_vec()));
        mt.insert(b"other".to_vec(), 2, MemtableEntry::Value(b"x".to_vec()));
        mt.insert(b"key".to_vec(), 3, MemtableEntry::Tombstone);

        let versions = mt.get(b"key");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].sequence, 3);
        assert_eq!(versions[0].entry, MemtableEntry::Tombstone);
        assert_eq!(versions[1].entry, MemtableEntry::Value(b"v1".to_vec()));
        assert!(mt.get(b"missing").is_empty());
    }

    #[test]
    fn test_memtable_size_tracking() {
        let mut mt = memtable();
        mt.insert(b"key".to_vec(), 1, MemtableEntry::Value(b"value".to_vec()));
        assert!(mt.size_bytes() > 0);
    }

    #[test]
    fn test_memtable_uses_comparator_order() {
        let mut mt = Memtable::new(Arc::new(ReverseBytewiseComparator));
        mt.insert(b"a".to_vec(), 1, MemtableEntry::Value(b"1".to_vec()));
        mt.insert(b"c".to_vec(), 2, MemtableEntry::Value(b"3".to_vec()));
        mt.insert(b"b".to_vec(), 3, MemtableEntry::Merge(b"2".to_vec()));

        let keys: Vec<_> = mt.iter().map(|v| v.key.clone()).collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        assert!(mt.get(b"b")[0].entry.is_merge());
    }
}
