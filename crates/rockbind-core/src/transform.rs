//! Prefix extraction.

/// Maps a key to its prefix.
///
/// Used for prefix iteration and to group entries for batched compaction
/// filters.
pub trait SliceTransform: Send + Sync {
    fn name(&self) -> &str;

    /// The prefix of `key`. Only called for keys where
    /// [`SliceTransform::in_domain`] holds; must return a sub-slice of `key`.
    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8];

    /// Whether `key` has a prefix at all.
    fn in_domain(&self, key: &[u8]) -> bool;

    /// Whether `prefix` can be the output of [`SliceTransform::transform`].
    fn in_range(&self, _prefix: &[u8]) -> bool {
        false
    }

    /// Whether appending bytes to `prefix` leaves its transform unchanged.
    fn same_result_when_appended(&self, _prefix: &[u8]) -> bool {
        false
    }
}

/// The first `len` bytes of every key at least `len` long.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrefixTransform {
    len: usize,
}

impl FixedPrefixTransform {
    pub fn new(len: usize) -> Self {
        Self { len }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl SliceTransform for FixedPrefixTransform {
    fn name(&self) -> &str {
        "rockbind.FixedPrefix"
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..self.len.min(key.len())]
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        key.len() >= self.len
    }

    fn in_range(&self, prefix: &[u8]) -> bool {
        prefix.len() == self.len
    }

    fn same_result_when_appended(&self, prefix: &[u8]) -> bool {
        self.in_domain(prefix)
    }
}

/// Identity transform: the whole key is its own prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransform;

impl SliceTransform for NoopTransform {
    fn name(&self) -> &str {
        "rockbind.Noop"
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        key
    }

    fn in_domain(&self, _key: &[u8]) -> bool {
        true
    }

    fn in_range(&self, _prefix: &[u8]) -> bool {
        true
    }
}
