//! Buffer and status conversions at the FFI boundary.
//!
//! Bytes coming from the native side are borrowed for the duration of one
//! call and copied when they must outlive it. Bytes going to the native side
//! either stay borrowed (arguments) or are copied into `malloc` allocations
//! whose ownership passes to the engine (upcall results).

use libc::{c_char, c_void, size_t};
use rockbind_core::{Error, Result};
use rockbind_native as ffi;
use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr;

/// Borrow `(ptr, len)` from the native side. Null is the empty slice.
///
/// # Safety
/// `ptr` must be null or valid for reads of `len` bytes for `'a`.
pub(crate) unsafe fn slice<'a>(ptr: *const c_char, len: size_t) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len)
    }
}

/// Borrow parallel pointer and length arrays.
///
/// # Safety
/// Both arrays must hold `n` elements, each valid per [`slice`].
pub(crate) unsafe fn slices<'a>(
    ptrs: *const *const c_char,
    lens: *const size_t,
    n: usize,
) -> Vec<&'a [u8]> {
    if n == 0 || ptrs.is_null() || lens.is_null() {
        return Vec::new();
    }
    let ptrs = std::slice::from_raw_parts(ptrs, n);
    let lens = std::slice::from_raw_parts(lens, n);
    ptrs.iter().zip(lens).map(|(&p, &l)| slice(p, l)).collect()
}

pub(crate) fn as_c(data: &[u8]) -> *const c_char {
    data.as_ptr() as *const c_char
}

/// Pointer and length of an optional argument; `None` is passed as null.
pub(crate) fn opt_c(data: Option<&[u8]>) -> (*const c_char, size_t) {
    data.map_or((ptr::null(), 0), |d| (as_c(d), d.len()))
}

/// Copy `data` into a `malloc` allocation handed to the engine, writing its
/// length to `out_len`.
///
/// # Safety
/// `out_len` must be null or valid for writes.
pub(crate) unsafe fn malloc_bytes(data: &[u8], out_len: *mut size_t) -> *mut c_char {
    // malloc(0) may legally return null, which the engine reads as "no result"
    let buf = libc::malloc(data.len().max(1)) as *mut u8;
    if buf.is_null() {
        tracing::error!(len = data.len(), "malloc failed for upcall result");
        return ptr::null_mut();
    }
    ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len());
    if !out_len.is_null() {
        *out_len = data.len();
    }
    buf as *mut c_char
}

/// Copy `s` into a NUL-terminated `malloc` allocation. Interior NULs
/// truncate the name.
pub(crate) fn malloc_cstring(s: &str) -> *mut c_char {
    let bytes = s.as_bytes();
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    unsafe {
        let buf = libc::malloc(len + 1) as *mut u8;
        if buf.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), buf, len);
        *buf.add(len) = 0;
        buf as *mut c_char
    }
}

/// Copy and free a buffer the engine allocated for us.
///
/// # Safety
/// `ptr` must be null or an engine allocation of at least `len` bytes that
/// nobody else frees.
pub(crate) unsafe fn take_bytes(ptr: *mut c_char, len: size_t) -> Vec<u8> {
    if ptr.is_null() {
        return Vec::new();
    }
    let out = slice(ptr, len).to_vec();
    ffi::rb_free(ptr as *mut c_void);
    out
}

/// Copy and free a NUL-terminated string the engine allocated for us.
///
/// # Safety
/// See [`take_bytes`].
pub(crate) unsafe fn take_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let out = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    ffi::rb_free(ptr as *mut c_void);
    Some(out)
}

pub(crate) fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| {
        Error::InvalidArgument(format!("{:?} contains an interior NUL byte", s))
    })
}

pub(crate) fn path_cstring(path: &Path) -> Result<CString> {
    let path = path.to_str().ok_or_else(|| {
        Error::InvalidArgument(format!("path is not valid UTF-8: {}", path.display()))
    })?;
    cstring(path)
}

/// Run a native call that reports through a status out-parameter.
pub(crate) fn with_status<T>(call: impl FnOnce(*mut ffi::rb_status_t) -> T) -> Result<T> {
    let mut status = ffi::rb_status_t::ok();
    let out = call(&mut status);
    unsafe { ffi::decode_status(&mut status) }.into_result()?;
    Ok(out)
}
