//! Write batches
//!
//! A batch collects puts, merges and deletes that are applied atomically and
//! logged as one record. Its serialized form (`data`) is the bincode encoding
//! of the operation list and can be turned back into a batch.

use crate::raw::{bytes, malloc_bytes};
use bincode::Options as _;
use libc::{c_char, c_int, size_t};
use rockbind_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ptr;

/// Upper bound on a decoded batch, guards against hostile length prefixes
const MAX_BATCH_BYTES: u64 = 1 << 30;

/// Column family id of the default column family
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/// One batched operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Put {
        cf: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Merge {
        cf: u32,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: u32,
        key: Vec<u8>,
    },
}

impl BatchOp {
    pub fn column_family(&self) -> u32 {
        match self {
            BatchOp::Put { cf, .. } | BatchOp::Merge { cf, .. } | BatchOp::Delete { cf, .. } => *cf,
        }
    }
}

fn codec() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_limit(MAX_BATCH_BYTES)
}

/// Ordered list of operations
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    /// Serialized form, rebuilt lazily after a mutation
    rep: Option<Vec<u8>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a batch from the output of [`WriteBatch::data`].
    pub fn from_data(data: &[u8]) -> Result<Self> {
        let ops: Vec<BatchOp> = codec()
            .deserialize(data)
            .map_err(|e| Error::Serialization(format!("Failed to decode write batch: {}", e)))?;
        Ok(Self {
            ops,
            rep: Some(data.to_vec()),
        })
    }

    pub(crate) fn from_ops(ops: Vec<BatchOp>) -> Self {
        Self { ops, rep: None }
    }

    fn push(&mut self, op: BatchOp) {
        self.rep = None;
        self.ops.push(op);
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.put_cf(DEFAULT_COLUMN_FAMILY_ID, key, value)
    }

    pub fn put_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) {
        self.push(BatchOp::Put {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    pub fn merge(&mut self, key: &[u8], value: &[u8]) {
        self.merge_cf(DEFAULT_COLUMN_FAMILY_ID, key, value)
    }

    pub fn merge_cf(&mut self, cf: u32, key: &[u8], value: &[u8]) {
        self.push(BatchOp::Merge {
            cf,
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.delete_cf(DEFAULT_COLUMN_FAMILY_ID, key)
    }

    pub fn delete_cf(&mut self, cf: u32, key: &[u8]) {
        self.push(BatchOp::Delete {
            cf,
            key: key.to_vec(),
        })
    }

    pub fn clear(&mut self) {
        self.ops.clear();
        self.rep = None;
    }

    pub fn count(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// Serialized form of the batch.
    pub fn data(&mut self) -> Result<&[u8]> {
        if self.rep.is_none() {
            let rep = codec()
                .serialize(&self.ops)
                .map_err(|e| Error::Serialization(format!("Failed to encode write batch: {}", e)))?;
            self.rep = Some(rep);
        }
        Ok(self.rep.as_deref().unwrap_or_default())
    }
}

pub struct rb_writebatch_t {
    pub(crate) inner: WriteBatch,
}

#[no_mangle]
pub extern "C" fn rb_writebatch_create() -> *mut rb_writebatch_t {
    Box::into_raw(Box::new(rb_writebatch_t {
        inner: WriteBatch::new(),
    }))
}

/// Rebuild a batch from serialized bytes. Returns null if they do not decode.
///
/// # Safety
/// `data` must be valid for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_create_from(
    data: *const c_char,
    len: size_t,
) -> *mut rb_writebatch_t {
    match WriteBatch::from_data(bytes(data, len)) {
        Ok(inner) => Box::into_raw(Box::new(rb_writebatch_t { inner })),
        Err(e) => {
            tracing::warn!(error = %e, "rejecting malformed write batch");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `b` must come from one of the create functions.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_destroy(b: *mut rb_writebatch_t) {
    if !b.is_null() {
        drop(Box::from_raw(b));
    }
}

/// # Safety
/// `b` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_clear(b: *mut rb_writebatch_t) {
    if let Some(b) = b.as_mut() {
        b.inner.clear();
    }
}

/// # Safety
/// `b` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_count(b: *const rb_writebatch_t) -> c_int {
    b.as_ref().map_or(0, |b| b.inner.count() as c_int)
}

/// # Safety
/// `b` must be live; key and value must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_put(
    b: *mut rb_writebatch_t,
    cf: u32,
    key: *const c_char,
    key_len: size_t,
    value: *const c_char,
    value_len: size_t,
) {
    if let Some(b) = b.as_mut() {
        b.inner.put_cf(cf, bytes(key, key_len), bytes(value, value_len));
    }
}

/// # Safety
/// `b` must be live; key and value must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_merge(
    b: *mut rb_writebatch_t,
    cf: u32,
    key: *const c_char,
    key_len: size_t,
    value: *const c_char,
    value_len: size_t,
) {
    if let Some(b) = b.as_mut() {
        b.inner.merge_cf(cf, bytes(key, key_len), bytes(value, value_len));
    }
}

/// # Safety
/// `b` must be live; key must be valid for `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_delete(
    b: *mut rb_writebatch_t,
    cf: u32,
    key: *const c_char,
    key_len: size_t,
) {
    if let Some(b) = b.as_mut() {
        b.inner.delete_cf(cf, bytes(key, key_len));
    }
}

/// Serialized batch as a `malloc`'d buffer owned by the caller. Null if
/// encoding fails.
///
/// # Safety
/// `b` must be live; `len` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_data(
    b: *mut rb_writebatch_t,
    len: *mut size_t,
) -> *mut c_char {
    let Some(b) = b.as_mut() else {
        return ptr::null_mut();
    };
    match b.inner.data() {
        Ok(data) => {
            if !len.is_null() {
                *len = data.len();
            }
            malloc_bytes(data)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode write batch");
            ptr::null_mut()
        }
    }
}

/// Size of the serialized batch in bytes.
///
/// # Safety
/// `b` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_writebatch_data_size(b: *mut rb_writebatch_t) -> size_t {
    b.as_mut()
        .and_then(|b| b.inner.data().ok().map(<[u8]>::len))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_ops_and_count() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.merge_cf(3, b"b", b"+1");
        batch.delete(b"c");

        assert_eq!(batch.count(), 3);
        assert_eq!(batch.ops()[1].column_family(), 3);

        batch.clear();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_data_rebuilds_batch() {
        let mut batch = WriteBatch::new();
        batch.put(b"key", b"value");
        batch.delete_cf(2, b"gone");

        let data = batch.data().unwrap().to_vec();
        let restored = WriteBatch::from_data(&data).unwrap();
        assert_eq!(restored.ops(), batch.ops());
    }

    #[test]
    fn test_data_cache_invalidated_by_mutation() {
        let mut batch = WriteBatch::new();
        batch.put(b"a", b"1");
        let before = batch.data().unwrap().len();
        batch.put(b"b", b"2");
        assert!(batch.data().unwrap().len() > before);
    }

    #[test]
    fn test_malformed_data_rejected() {
        assert!(WriteBatch::from_data(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
        let raw = unsafe { rb_writebatch_create_from([7u8, 1].as_ptr() as *const c_char, 2) };
        assert!(raw.is_null());
    }
}
