use crate::db::DbInner;
use crate::handle::{Handle, HandleGuard, NativeResource};
use crate::marshal::{as_c, slice, with_status};
use rockbind_core::Result;
use rockbind_native as ffi;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

impl NativeResource for ffi::rb_iterator_t {
    const KIND: &'static str = "iterator";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_iter_destroy(raw)
    }
}

/// Cursor over one column family.
///
/// The view is fixed when the iterator is created. Calls are serialised
/// internally, so an iterator may be shared between threads.
#[derive(Debug)]
pub struct DbIterator {
    handle: Handle<ffi::rb_iterator_t>,
    lock: Mutex<()>,
    pub(crate) parent: Arc<DbInner>,
}

impl DbIterator {
    pub(crate) fn new(raw: *mut ffi::rb_iterator_t, parent: Arc<DbInner>) -> Self {
        Self {
            handle: Handle::owned(raw),
            lock: Mutex::new(()),
            parent,
        }
    }

    // Guards no data; a poisoned lock is still usable
    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Null once closed; the engine treats a null iterator as exhausted
    fn raw(&self) -> HandleGuard<'_, ffi::rb_iterator_t> {
        self.handle.get()
    }

    pub fn valid(&self) -> bool {
        let _guard = self.guard();
        unsafe { ffi::rb_iter_valid(self.raw().as_ptr()) != 0 }
    }

    pub fn seek_to_first(&self) {
        let _guard = self.guard();
        unsafe { ffi::rb_iter_seek_to_first(self.raw().as_ptr()) }
    }

    pub fn seek_to_last(&self) {
        let _guard = self.guard();
        unsafe { ffi::rb_iter_seek_to_last(self.raw().as_ptr()) }
    }

    /// Position at the first key at or after `key`.
    pub fn seek(&self, key: &[u8]) {
        let _guard = self.guard();
        unsafe { ffi::rb_iter_seek(self.raw().as_ptr(), as_c(key), key.len()) }
    }

    pub fn next(&self) {
        let _guard = self.guard();
        unsafe { ffi::rb_iter_next(self.raw().as_ptr()) }
    }

    pub fn prev(&self) {
        let _guard = self.guard();
        unsafe { ffi::rb_iter_prev(self.raw().as_ptr()) }
    }

    pub fn key(&self) -> Option<Vec<u8>> {
        let _guard = self.guard();
        let handle = self.raw();
        let raw = handle.as_ptr();
        unsafe {
            if ffi::rb_iter_valid(raw) == 0 {
                return None;
            }
            let mut len = 0;
            let key = ffi::rb_iter_key(raw, &mut len);
            Some(slice(key, len).to_vec())
        }
    }

    pub fn value(&self) -> Option<Vec<u8>> {
        let _guard = self.guard();
        let handle = self.raw();
        let raw = handle.as_ptr();
        unsafe {
            if ffi::rb_iter_valid(raw) == 0 {
                return None;
            }
            let mut len = 0;
            let value = ffi::rb_iter_value(raw, &mut len);
            Some(slice(value, len).to_vec())
        }
    }

    /// Whether the view was built without error.
    pub fn status(&self) -> Result<()> {
        let _guard = self.guard();
        let handle = self.handle.require()?;
        with_status(|status| unsafe { ffi::rb_iter_get_status(handle.as_ptr(), status) })
    }

    /// Every entry from the first key onwards, leaving the iterator
    /// exhausted.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        self.seek_to_first();
        while let (Some(key), Some(value)) = (self.key(), self.value()) {
            out.push((key, value));
            self.next();
        }
        out
    }

    /// Release the native iterator. Waits for a call in progress on another
    /// thread; afterwards the iterator is invalid.
    pub fn close(&self) {
        let _guard = self.guard();
        self.handle.close();
    }
}
