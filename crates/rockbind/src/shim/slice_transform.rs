use super::{destructor, guarded, name, resolve};
use crate::marshal::slice;
use crate::registry::{Callback, Registry, Token};
use libc::{c_char, c_uchar, c_void, size_t};
use rockbind_core::SliceTransform;
use rockbind_native as ffi;
use std::sync::Arc;

pub(crate) fn create(transform: Arc<dyn SliceTransform>) -> (Token, *mut ffi::rb_slicetransform_t) {
    let token = Registry::global().register(Callback::SliceTransform(transform));
    let raw = unsafe {
        ffi::rb_slicetransform_create(
            token.as_state(),
            Some(destructor),
            Some(transform_shim),
            Some(in_domain),
            Some(in_range),
            Some(same_result_when_appended),
            Some(name),
        )
    };
    (token, raw)
}

/// Writes the prefix as an offset and length into the key. A miss leaves
/// the whole key.
pub(crate) unsafe extern "C" fn transform_shim(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    prefix_offset: *mut size_t,
    prefix_len: *mut size_t,
) {
    let key = slice(key, key_len);
    let (offset, len) = guarded("slice_transform.transform", (0, key.len()), || {
        match resolve("slice_transform.transform", state, Registry::slice_transform) {
            Some(transform) => {
                let prefix = transform.transform(key);
                let offset = (prefix.as_ptr() as usize).wrapping_sub(key.as_ptr() as usize);
                if prefix.is_empty() {
                    (0, 0)
                } else if offset.checked_add(prefix.len()).is_some_and(|end| end <= key.len()) {
                    (offset, prefix.len())
                } else {
                    tracing::error!("slice transform returned a slice outside the key");
                    (0, key.len())
                }
            }
            None => (0, key.len()),
        }
    });
    if !prefix_offset.is_null() {
        *prefix_offset = offset;
    }
    if !prefix_len.is_null() {
        *prefix_len = len;
    }
}

unsafe fn predicate(
    shim: &'static str,
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    test: impl FnOnce(&dyn SliceTransform, &[u8]) -> bool,
) -> c_uchar {
    let key = slice(key, key_len);
    guarded(shim, 0, || {
        resolve(shim, state, Registry::slice_transform)
            .map_or(0, |transform| test(transform.as_ref(), key) as c_uchar)
    })
}

/// A miss answers false, which disables prefix handling for the key.
pub(crate) unsafe extern "C" fn in_domain(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
) -> c_uchar {
    predicate("slice_transform.in_domain", state, key, key_len, |t, k| t.in_domain(k))
}

pub(crate) unsafe extern "C" fn in_range(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
) -> c_uchar {
    predicate("slice_transform.in_range", state, key, key_len, |t, k| t.in_range(k))
}

pub(crate) unsafe extern "C" fn same_result_when_appended(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
) -> c_uchar {
    predicate("slice_transform.same_result_when_appended", state, key, key_len, |t, k| {
        t.same_result_when_appended(k)
    })
}
