//! Replaying logged writes.
//!
//! An iterator over the write batches appended to the log after a given
//! sequence number. Like [`crate::iterator`], the batches are read when the
//! iterator is created.

use crate::raw::{set_status, rb_status_t};
use crate::write_batch::{rb_writebatch_t, WriteBatch};
use libc::c_uchar;
use rockbind_core::{Result, Status};
use std::ptr;

pub struct rb_wal_iterator_t {
    batches: Vec<(u64, WriteBatch)>,
    position: usize,
    status: Status,
}

impl rb_wal_iterator_t {
    pub(crate) fn new(batches: Result<Vec<(u64, WriteBatch)>>) -> Self {
        let (batches, status) = match batches {
            Ok(batches) => (batches, Status::ok()),
            Err(e) => (Vec::new(), crate::raw::status_of(e)),
        };
        Self {
            batches,
            position: 0,
            status,
        }
    }

    pub fn valid(&self) -> bool {
        self.position < self.batches.len()
    }

    pub fn next(&mut self) {
        if self.valid() {
            self.position += 1;
        }
    }

    /// The current batch and its first sequence number.
    pub fn batch(&self) -> Option<&(u64, WriteBatch)> {
        self.batches.get(self.position)
    }

    pub fn status(&self) -> &Status {
        &self.status
    }
}

/// # Safety
/// `iter` must come from `rb_get_updates_since`.
#[no_mangle]
pub unsafe extern "C" fn rb_wal_iter_destroy(iter: *mut rb_wal_iterator_t) {
    if !iter.is_null() {
        drop(Box::from_raw(iter));
    }
}

/// # Safety
/// `iter` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_wal_iter_valid(iter: *const rb_wal_iterator_t) -> c_uchar {
    iter.as_ref().map_or(0, |it| it.valid() as c_uchar)
}

/// # Safety
/// `iter` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_wal_iter_next(iter: *mut rb_wal_iterator_t) {
    if let Some(it) = iter.as_mut() {
        it.next();
    }
}

/// # Safety
/// `iter` must be live; `status` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_wal_iter_status(
    iter: *const rb_wal_iterator_t,
    status: *mut rb_status_t,
) {
    match iter.as_ref() {
        Some(it) => set_status(status, it.status()),
        None => set_status(status, &Status::invalid_argument("null iterator")),
    }
}

/// Copy of the current batch, owned by the caller, with its first sequence
/// number written to `sequence`. Null when the iterator is not valid.
///
/// # Safety
/// `iter` must be live; `sequence` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_wal_iter_get_batch(
    iter: *const rb_wal_iterator_t,
    sequence: *mut u64,
) -> *mut rb_writebatch_t {
    let Some((first, batch)) = iter.as_ref().and_then(rb_wal_iterator_t::batch) else {
        return ptr::null_mut();
    };
    if !sequence.is_null() {
        *sequence = *first;
    }
    Box::into_raw(Box::new(rb_writebatch_t {
        inner: batch.clone(),
    }))
}
