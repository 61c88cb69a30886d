use super::{destructor, guarded, name, resolve};
use crate::marshal::{malloc_bytes, slice};
use crate::registry::{Callback, Registry, Token};
use libc::{c_char, c_int, c_void, size_t};
use rockbind_core::Comparator;
use rockbind_native as ffi;
use std::cmp::Ordering;
use std::ptr;
use std::sync::Arc;

/// Register `cmp` and build the native comparator around its token.
pub(crate) fn create(cmp: Arc<dyn Comparator>) -> (Token, *mut ffi::rb_comparator_t) {
    let token = Registry::global().register(Callback::Comparator(cmp));
    let raw = unsafe {
        ffi::rb_comparator_create(
            token.as_state(),
            Some(destructor),
            Some(compare),
            Some(name),
            Some(find_shortest_separator),
            Some(find_short_successor),
        )
    };
    (token, raw)
}

fn ordering_to_c(ordering: Ordering) -> c_int {
    match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Falls back to byte-wise order so the engine keeps a total order.
pub(crate) unsafe extern "C" fn compare(
    state: *mut c_void,
    a: *const c_char,
    a_len: size_t,
    b: *const c_char,
    b_len: size_t,
) -> c_int {
    let (a, b) = (slice(a, a_len), slice(b, b_len));
    let bytewise = ordering_to_c(a.cmp(b));
    guarded("comparator.compare", bytewise, || {
        match resolve("comparator.compare", state, Registry::comparator) {
            Some(cmp) => ordering_to_c(cmp.compare(a, b)),
            None => bytewise,
        }
    })
}

pub(crate) unsafe extern "C" fn find_shortest_separator(
    state: *mut c_void,
    start: *const c_char,
    start_len: size_t,
    limit: *const c_char,
    limit_len: size_t,
    out_len: *mut size_t,
) -> *mut c_char {
    let (start, limit) = (slice(start, start_len), slice(limit, limit_len));
    guarded("comparator.find_shortest_separator", ptr::null_mut(), || {
        resolve("comparator.find_shortest_separator", state, Registry::comparator)
            .and_then(|cmp| cmp.find_shortest_separator(start, limit))
            .map_or(ptr::null_mut(), |sep| malloc_bytes(&sep, out_len))
    })
}

pub(crate) unsafe extern "C" fn find_short_successor(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    out_len: *mut size_t,
) -> *mut c_char {
    let key = slice(key, key_len);
    guarded("comparator.find_short_successor", ptr::null_mut(), || {
        resolve("comparator.find_short_successor", state, Registry::comparator)
            .and_then(|cmp| cmp.find_short_successor(key))
            .map_or(ptr::null_mut(), |succ| malloc_bytes(&succ, out_len))
    })
}
