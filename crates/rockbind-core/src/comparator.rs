//! Key ordering.

use std::cmp::Ordering;

/// A total order over keys.
///
/// The engine stores and iterates keys in the order defined by `compare`.
/// The name is persisted when a database is created and checked on every
/// reopen, so it must change whenever the ordering changes.
pub trait Comparator: Send + Sync {
    /// Stable name of the ordering.
    fn name(&self) -> &str;

    /// Three-way comparison of two keys.
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Returns a key `k` with `start <= k < limit`, shorter than `start` if
    /// possible. `None` leaves `start` unchanged.
    fn find_shortest_separator(&self, _start: &[u8], _limit: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Returns a short key `k >= key`. `None` leaves `key` unchanged.
    fn find_short_successor(&self, _key: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Lexicographic byte-wise ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "rockbind.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Option<Vec<u8>> {
        let shared = start
            .iter()
            .zip(limit.iter())
            .take_while(|(a, b)| a == b)
            .count();

        // One key is a prefix of the other
        if shared >= start.len().min(limit.len()) {
            return None;
        }

        let byte = start[shared];
        if byte < 0xff && byte + 1 < limit[shared] {
            let mut sep = start[..=shared].to_vec();
            sep[shared] += 1;
            return Some(sep);
        }
        None
    }

    fn find_short_successor(&self, key: &[u8]) -> Option<Vec<u8>> {
        let pos = key.iter().position(|&b| b != 0xff)?;
        let mut succ = key[..=pos].to_vec();
        succ[pos] += 1;
        Some(succ)
    }
}

/// Byte-wise ordering, reversed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReverseBytewiseComparator;

impl Comparator for ReverseBytewiseComparator {
    fn name(&self) -> &str {
        "rockbind.ReverseBytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}
