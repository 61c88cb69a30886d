use crate::column_family::ColumnFamilyHandle;
use crate::handle::{Handle, NativeResource};
use crate::marshal::{as_c, take_bytes};
use rockbind_core::{Error, Result};
use rockbind_native as ffi;
use std::sync::{Mutex, MutexGuard, PoisonError};

impl NativeResource for ffi::rb_writebatch_t {
    const KIND: &'static str = "write_batch";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_writebatch_destroy(raw)
    }
}

/// Writes applied atomically by [`crate::DB::write`].
///
/// A closed batch ignores further writes and is rejected by `DB::write`.
#[derive(Debug)]
pub struct WriteBatch {
    handle: Handle<ffi::rb_writebatch_t>,
    lock: Mutex<()>,
}

fn live_id(cf: &ColumnFamilyHandle) -> Result<u32> {
    cf.raw().map(|_| cf.id())
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::from_raw(ffi::rb_writebatch_create())
    }

    /// Rebuild a batch from the bytes of [`WriteBatch::data`].
    pub fn from_data(data: &[u8]) -> Result<Self> {
        let raw = unsafe { ffi::rb_writebatch_create_from(as_c(data), data.len()) };
        if raw.is_null() {
            return Err(Error::Serialization("malformed write batch".to_string()));
        }
        Ok(Self::from_raw(raw))
    }

    pub(crate) fn from_raw(raw: *mut ffi::rb_writebatch_t) -> Self {
        Self {
            handle: Handle::owned(raw),
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `call` on the live native batch, holding off writers and
    /// `close` until it returns.
    pub(crate) fn with_raw<R>(
        &self,
        call: impl FnOnce(*mut ffi::rb_writebatch_t) -> Result<R>,
    ) -> Result<R> {
        let _guard = self.guard();
        let handle = self.handle.require()?;
        call(handle.as_ptr())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) {
        self.put_id(ffi::DEFAULT_COLUMN_FAMILY_ID, key, value)
    }

    pub fn put_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_id(live_id(cf)?, key, value);
        Ok(())
    }

    fn put_id(&self, cf: u32, key: &[u8], value: &[u8]) {
        let _guard = self.guard();
        unsafe {
            ffi::rb_writebatch_put(
                self.handle.get().as_ptr(),
                cf,
                as_c(key),
                key.len(),
                as_c(value),
                value.len(),
            )
        }
    }

    pub fn merge(&self, key: &[u8], value: &[u8]) {
        self.merge_id(ffi::DEFAULT_COLUMN_FAMILY_ID, key, value)
    }

    pub fn merge_cf(&self, cf: &ColumnFamilyHandle, key: &[u8], value: &[u8]) -> Result<()> {
        self.merge_id(live_id(cf)?, key, value);
        Ok(())
    }

    fn merge_id(&self, cf: u32, key: &[u8], value: &[u8]) {
        let _guard = self.guard();
        unsafe {
            ffi::rb_writebatch_merge(
                self.handle.get().as_ptr(),
                cf,
                as_c(key),
                key.len(),
                as_c(value),
                value.len(),
            )
        }
    }

    pub fn delete(&self, key: &[u8]) {
        self.delete_id(ffi::DEFAULT_COLUMN_FAMILY_ID, key)
    }

    pub fn delete_cf(&self, cf: &ColumnFamilyHandle, key: &[u8]) -> Result<()> {
        self.delete_id(live_id(cf)?, key);
        Ok(())
    }

    fn delete_id(&self, cf: u32, key: &[u8]) {
        let _guard = self.guard();
        unsafe { ffi::rb_writebatch_delete(self.handle.get().as_ptr(), cf, as_c(key), key.len()) }
    }

    pub fn clear(&self) {
        let _guard = self.guard();
        unsafe { ffi::rb_writebatch_clear(self.handle.get().as_ptr()) }
    }

    pub fn count(&self) -> usize {
        let _guard = self.guard();
        let count = unsafe { ffi::rb_writebatch_count(self.handle.get().as_ptr()) };
        usize::try_from(count).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The serialized batch.
    pub fn data(&self) -> Result<Vec<u8>> {
        let _guard = self.guard();
        let mut len = 0;
        let raw = unsafe { ffi::rb_writebatch_data(self.handle.get().as_ptr(), &mut len) };
        if raw.is_null() {
            return Err(Error::Serialization("failed to encode write batch".to_string()));
        }
        Ok(unsafe { take_bytes(raw, len) })
    }

    /// Release the native batch once a call in progress on another thread
    /// returns.
    pub fn close(&self) {
        let _guard = self.guard();
        self.handle.close();
    }
}
