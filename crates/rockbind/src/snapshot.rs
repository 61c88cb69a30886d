use crate::db::DbInner;
use crate::handle::{Handle, HandleGuard, NativeResource};
use rockbind_core::Result;
use rockbind_native as ffi;
use std::ptr;
use std::sync::Arc;

impl NativeResource for ffi::rb_snapshot_t {
    const KIND: &'static str = "snapshot";

    // The engine keeps snapshot bookkeeping alive on its own, so release
    // works whether or not the database is still open.
    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_release_snapshot(ptr::null_mut(), raw)
    }
}

/// A consistent point-in-time view of a database.
///
/// While any snapshot is alive, compactions keep every version a snapshot
/// can still see.
#[derive(Debug)]
pub struct Snapshot {
    handle: Handle<ffi::rb_snapshot_t>,
    pub(crate) parent: Arc<DbInner>,
}

impl Snapshot {
    pub(crate) fn new(raw: *mut ffi::rb_snapshot_t, parent: Arc<DbInner>) -> Self {
        Self {
            handle: Handle::owned(raw),
            parent,
        }
    }

    /// The sequence number the snapshot reads at, 0 once released.
    pub fn sequence_number(&self) -> u64 {
        unsafe { ffi::rb_snapshot_get_sequence_number(self.handle.get().as_ptr()) }
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub(crate) fn raw(&self) -> Result<HandleGuard<'_, ffi::rb_snapshot_t>> {
        self.handle.require()
    }
}
