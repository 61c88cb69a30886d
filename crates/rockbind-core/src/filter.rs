//! Table filter policies.
//!
//! A filter summarises the keys of an immutable table so point reads can skip
//! tables that cannot contain the key. False positives are allowed, false
//! negatives are not.

/// Incremental builder for the full-filter format.
pub trait FilterBitsBuilder: Send {
    /// Add one key to the filter under construction.
    fn add_key(&mut self, key: &[u8]);

    /// Produce the filter contents and reset the builder.
    fn finish(&mut self) -> Vec<u8>;
}

/// Reader for filter contents produced by a [`FilterBitsBuilder`].
pub trait FilterBitsReader: Send + Sync {
    fn may_match(&self, key: &[u8]) -> bool;
}

/// Builds and queries per-table filters.
pub trait FilterPolicy: Send + Sync {
    /// Stable name of the filter format.
    fn name(&self) -> &str;

    /// Build a filter over `keys`.
    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8>;

    /// Must return true if `key` was among the keys `filter` was built from.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;

    /// Full-filter builder. When present the engine prefers it over
    /// [`FilterPolicy::create_filter`].
    fn bits_builder(&self) -> Option<Box<dyn FilterBitsBuilder>> {
        None
    }

    /// Full-filter reader for contents produced by [`FilterPolicy::bits_builder`].
    fn bits_reader(&self, _contents: &[u8]) -> Option<Box<dyn FilterBitsReader>> {
        None
    }
}

/// Builtin bloom filter in the classic per-table format: a bit array
/// followed by one byte holding the number of hash functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: u8,
}

impl BloomFilterPolicy {
    /// About 1% false positives at 10 bits per key.
    pub fn new(bits_per_key: usize) -> Self {
        // k = ln(2) * bits_per_key
        let k = (bits_per_key as f64 * 0.69) as usize;
        Self {
            bits_per_key,
            k: k.clamp(1, 30) as u8,
        }
    }

    pub fn bits_per_key(&self) -> usize {
        self.bits_per_key
    }
}

/// Murmur-style hash used for the bloom bit positions.
fn bloom_hash(data: &[u8]) -> u32 {
    const SEED: u32 = 0xbc9f_1d34;
    const M: u32 = 0xc6a4_a793;
    let mut h = SEED ^ (data.len() as u32).wrapping_mul(M);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h = h.wrapping_add(w).wrapping_mul(M);
        h ^= h >> 16;
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        for (i, &b) in rest.iter().enumerate().rev() {
            h = h.wrapping_add(u32::from(b) << (8 * i));
        }
        h = h.wrapping_mul(M);
        h ^= h >> 24;
    }
    h
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "rockbind.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = (bits + 7) / 8;
        let bits = bytes * 8;

        let mut filter = vec![0u8; bytes + 1];
        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.k {
                let pos = h as usize % bits;
                filter[pos / 8] |= 1 << (pos % 8);
                h = h.wrapping_add(delta);
            }
        }
        filter[bytes] = self.k;
        filter
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        let Some((&k, array)) = filter.split_last() else {
            return false;
        };
        if array.is_empty() {
            return false;
        }
        // Reserved for other encodings
        if k > 30 {
            return true;
        }
        let bits = array.len() * 8;
        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..k {
            let pos = h as usize % bits;
            if array[pos / 8] & (1 << (pos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}
