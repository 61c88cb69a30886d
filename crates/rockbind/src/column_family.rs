use crate::db::DbInner;
use crate::handle::{Handle, HandleGuard, NativeResource};
use crate::marshal::take_string;
use rockbind_core::Result;
use rockbind_native as ffi;
use std::sync::Arc;

impl NativeResource for ffi::rb_column_family_handle_t {
    const KIND: &'static str = "column_family_handle";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_column_family_handle_destroy(raw)
    }
}

/// Reference to one column family of an open database.
///
/// The id and name are read when the handle is created and stay readable
/// after the handle is released. Every other use of a released handle is an
/// invalid argument; it never falls back to the default column family.
#[derive(Debug)]
pub struct ColumnFamilyHandle {
    handle: Handle<ffi::rb_column_family_handle_t>,
    id: u32,
    name: String,
    pub(crate) parent: Arc<DbInner>,
}

impl ColumnFamilyHandle {
    pub(crate) fn new(raw: *mut ffi::rb_column_family_handle_t, parent: Arc<DbInner>) -> Self {
        let id = unsafe { ffi::rb_column_family_handle_get_id(raw) };
        let name = unsafe { take_string(ffi::rb_column_family_handle_get_name(raw)) };
        Self {
            handle: Handle::owned(raw),
            id,
            name: name.unwrap_or_default(),
            parent,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub(crate) fn raw(&self) -> Result<HandleGuard<'_, ffi::rb_column_family_handle_t>> {
        self.handle.require()
    }
}
