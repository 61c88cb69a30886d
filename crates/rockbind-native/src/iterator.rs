//! Iterators over a consistent view of one column family.
//!
//! The view is resolved when the iterator is created (at the read sequence
//! number, stopping at `iterate_upper_bound`), so an iterator stays usable
//! after its database is closed.

use crate::options::ReadOptions;
use crate::raw::{bytes, set_status, rb_status_t};
use libc::{c_char, c_uchar, size_t};
use rockbind_core::{Comparator, Result, SliceTransform, Status};
use std::cmp::Ordering;
use std::ptr;
use std::sync::Arc;

pub struct rb_iterator_t {
    cmp: Arc<dyn Comparator>,
    prefix_extractor: Option<Arc<dyn SliceTransform>>,
    prefix_same_as_start: bool,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: Option<usize>,
    /// Prefix iteration is pinned to after a seek
    prefix: Option<Vec<u8>>,
    status: Status,
}

impl rb_iterator_t {
    pub(crate) fn new(
        options: &ReadOptions,
        cmp: Arc<dyn Comparator>,
        prefix_extractor: Option<Arc<dyn SliceTransform>>,
        entries: Result<Vec<(Vec<u8>, Vec<u8>)>>,
    ) -> Self {
        let (entries, status) = match entries {
            Ok(entries) => (entries, Status::ok()),
            Err(e) => (Vec::new(), crate::raw::status_of(e)),
        };
        Self {
            cmp,
            prefix_extractor,
            prefix_same_as_start: options.prefix_same_as_start,
            entries,
            position: None,
            prefix: None,
            status,
        }
    }

    pub fn valid(&self) -> bool {
        self.position.is_some()
    }

    pub fn seek_to_first(&mut self) {
        self.prefix = None;
        self.position = (!self.entries.is_empty()).then_some(0);
    }

    pub fn seek_to_last(&mut self) {
        self.prefix = None;
        self.position = self.entries.len().checked_sub(1);
    }

    /// Position at the first key `>=` target.
    pub fn seek(&mut self, target: &[u8]) {
        let pos = self
            .entries
            .partition_point(|(k, _)| self.cmp.compare(k, target) == Ordering::Less);
        self.position = (pos < self.entries.len()).then_some(pos);

        self.prefix = match &self.prefix_extractor {
            Some(t) if self.prefix_same_as_start && t.in_domain(target) => {
                Some(t.transform(target).to_vec())
            }
            _ => None,
        };
        self.check_prefix();
    }

    pub fn next(&mut self) {
        self.position = self
            .position
            .map(|p| p + 1)
            .filter(|&p| p < self.entries.len());
        self.check_prefix();
    }

    pub fn prev(&mut self) {
        self.position = self.position.and_then(|p| p.checked_sub(1));
        self.check_prefix();
    }

    fn check_prefix(&mut self) {
        let left_prefix = match (&self.prefix, &self.prefix_extractor, self.key()) {
            (Some(prefix), Some(transform), Some(key)) => {
                !transform.in_domain(key) || transform.transform(key) != prefix.as_slice()
            }
            _ => false,
        };
        if left_prefix {
            self.position = None;
        }
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.position.map(|p| self.entries[p].0.as_slice())
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.position.map(|p| self.entries[p].1.as_slice())
    }

    pub fn status(&self) -> &Status {
        &self.status
    }
}

/// # Safety
/// `iter` must come from `rb_create_iterator` or `rb_create_iterator_cf`.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_destroy(iter: *mut rb_iterator_t) {
    if !iter.is_null() {
        drop(Box::from_raw(iter));
    }
}

/// # Safety
/// `iter` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_valid(iter: *const rb_iterator_t) -> c_uchar {
    iter.as_ref().map_or(0, |it| it.valid() as c_uchar)
}

/// # Safety
/// `iter` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_seek_to_first(iter: *mut rb_iterator_t) {
    if let Some(it) = iter.as_mut() {
        it.seek_to_first();
    }
}

/// # Safety
/// `iter` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_seek_to_last(iter: *mut rb_iterator_t) {
    if let Some(it) = iter.as_mut() {
        it.seek_to_last();
    }
}

/// # Safety
/// `iter` must be live; `key` must be valid for `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_seek(
    iter: *mut rb_iterator_t,
    key: *const c_char,
    key_len: size_t,
) {
    if let Some(it) = iter.as_mut() {
        it.seek(bytes(key, key_len));
    }
}

/// # Safety
/// `iter` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_next(iter: *mut rb_iterator_t) {
    if let Some(it) = iter.as_mut() {
        it.next();
    }
}

/// # Safety
/// `iter` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_prev(iter: *mut rb_iterator_t) {
    if let Some(it) = iter.as_mut() {
        it.prev();
    }
}

unsafe fn borrowed(data: Option<&[u8]>, len: *mut size_t) -> *const c_char {
    let data = data.unwrap_or_default();
    if !len.is_null() {
        *len = data.len();
    }
    if data.is_empty() {
        ptr::null()
    } else {
        data.as_ptr() as *const c_char
    }
}

/// Current key, owned by the iterator and valid until it moves.
///
/// # Safety
/// `iter` must be live; `len` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_key(
    iter: *const rb_iterator_t,
    len: *mut size_t,
) -> *const c_char {
    borrowed(iter.as_ref().and_then(rb_iterator_t::key), len)
}

/// Current value, owned by the iterator and valid until it moves.
///
/// # Safety
/// `iter` must be live; `len` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_value(
    iter: *const rb_iterator_t,
    len: *mut size_t,
) -> *const c_char {
    borrowed(iter.as_ref().and_then(rb_iterator_t::value), len)
}

/// # Safety
/// `iter` must be live; `status` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_iter_get_status(iter: *const rb_iterator_t, status: *mut rb_status_t) {
    match iter.as_ref() {
        Some(it) => set_status(status, it.status()),
        None => set_status(status, &Status::invalid_argument("null iterator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rockbind_core::{BytewiseComparator, FixedPrefixTransform};

    fn entries(keys: &[&[u8]]) -> Vec<(Vec<u8>, Vec<u8>)> {
        keys.iter().map(|k| (k.to_vec(), b"v".to_vec())).collect()
    }

    fn iterator(options: &ReadOptions, keys: &[&[u8]]) -> rb_iterator_t {
        rb_iterator_t::new(
            options,
            Arc::new(BytewiseComparator),
            Some(Arc::new(FixedPrefixTransform::new(2))),
            Ok(entries(keys)),
        )
    }

    #[test]
    fn test_forward_and_backward() {
        let mut it = iterator(&ReadOptions::default(), &[b"a", b"b", b"c"]);
        assert!(!it.valid());

        it.seek_to_first();
        assert_eq!(it.key(), Some(&b"a"[..]));
        it.next();
        it.next();
        assert_eq!(it.key(), Some(&b"c"[..]));
        it.next();
        assert!(!it.valid());

        it.seek_to_last();
        it.prev();
        assert_eq!(it.key(), Some(&b"b"[..]));
        it.seek(b"bb");
        assert_eq!(it.key(), Some(&b"c"[..]));
        it.seek(b"d");
        assert!(!it.valid());
    }

    #[test]
    fn test_prefix_same_as_start() {
        let options = ReadOptions {
            prefix_same_as_start: true,
            ..Default::default()
        };
        let mut it = iterator(&options, &[b"aa1", b"aa2", b"ab1"]);
        it.seek(b"aa");
        assert_eq!(it.key(), Some(&b"aa1"[..]));
        it.next();
        assert_eq!(it.key(), Some(&b"aa2"[..]));
        it.next();
        assert!(!it.valid());

        // Without a seek the prefix is not pinned
        it.seek_to_first();
        it.next();
        it.next();
        assert_eq!(it.key(), Some(&b"ab1"[..]));
    }

    #[test]
    fn test_failed_view_reports_status() {
        let it = rb_iterator_t::new(
            &ReadOptions::default(),
            Arc::new(BytewiseComparator),
            None,
            Err(Status::corruption("merge failed").into()),
        );
        assert!(it.status().is_corruption());
        assert!(!it.valid());
    }
}
