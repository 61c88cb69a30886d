//! C ABI plumbing shared by every exported function: the status
//! out-parameter and buffer conversions.

use libc::{c_char, c_int, size_t};
use rockbind_core::{Error, Status, StatusCode};
use std::ffi::CStr;
use std::ptr;

/// Status out-parameter.
///
/// `message` is null or a NUL-terminated string allocated with `malloc`;
/// the receiver frees it with [`crate::rb_free`].
#[repr(C)]
#[derive(Debug)]
pub struct rb_status_t {
    pub code: c_int,
    pub message: *mut c_char,
}

impl rb_status_t {
    pub const fn ok() -> Self {
        Self {
            code: 0,
            message: ptr::null_mut(),
        }
    }
}

impl Default for rb_status_t {
    fn default() -> Self {
        Self::ok()
    }
}

/// Map an internal error to the status reported across the boundary.
pub(crate) fn status_of(err: Error) -> Status {
    match err {
        Error::Status(status) => status,
        Error::InvalidArgument(msg) => Status::invalid_argument(msg),
        Error::LockPoisoned => Status::busy("lock poisoned"),
        Error::Io(e) => Status::io_error(e.to_string()),
        Error::Serialization(msg) => Status::corruption(msg),
    }
}

/// Write `status` into `out`. A null `out` drops the status.
///
/// # Safety
/// `out` must be null or valid for writes.
pub(crate) unsafe fn set_status(out: *mut rb_status_t, status: &Status) {
    if out.is_null() {
        return;
    }
    let message = match status.message() {
        Some(msg) if !status.is_ok() => malloc_cstring(msg),
        _ => ptr::null_mut(),
    };
    *out = rb_status_t {
        code: status.code().as_raw(),
        message,
    };
}

/// Store the outcome of `result` in `out`, returning the value on success.
///
/// # Safety
/// `out` must be null or valid for writes.
pub(crate) unsafe fn report<T>(
    out: *mut rb_status_t,
    result: rockbind_core::Result<T>,
) -> Option<T> {
    match result {
        Ok(value) => {
            set_status(out, &Status::ok());
            Some(value)
        }
        Err(err) => {
            let status = status_of(err);
            tracing::debug!(%status, "native call failed");
            set_status(out, &status);
            None
        }
    }
}

/// Borrow `(ptr, len)` as a byte slice. A null pointer is the empty slice.
///
/// # Safety
/// `ptr` must be null or valid for reads of `len` bytes for `'a`.
pub(crate) unsafe fn bytes<'a>(ptr: *const c_char, len: size_t) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len)
    }
}

/// Borrow parallel pointer/length arrays as slices.
///
/// # Safety
/// Both arrays must hold `n` elements and every element must satisfy the
/// contract of [`bytes`].
pub(crate) unsafe fn byte_arrays<'a>(
    ptrs: *const *const c_char,
    lens: *const size_t,
    n: usize,
) -> Vec<&'a [u8]> {
    if n == 0 || ptrs.is_null() || lens.is_null() {
        return Vec::new();
    }
    let ptrs = std::slice::from_raw_parts(ptrs, n);
    let lens = std::slice::from_raw_parts(lens, n);
    ptrs.iter().zip(lens).map(|(&p, &l)| bytes(p, l)).collect()
}

/// Read a NUL-terminated UTF-8 path or name.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char) -> rockbind_core::Result<&'a str> {
    if ptr.is_null() {
        return Err(Error::InvalidArgument("null string".to_string()));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| Error::InvalidArgument(format!("string is not UTF-8: {}", e)))
}

/// Copy `data` into a `malloc` allocation the caller frees.
pub(crate) fn malloc_bytes(data: &[u8]) -> *mut c_char {
    // malloc(0) may return null; always allocate at least one byte
    let buf = unsafe { libc::malloc(data.len().max(1)) } as *mut u8;
    if !buf.is_null() && !data.is_empty() {
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len()) };
    }
    buf as *mut c_char
}

/// Copy `s` into a NUL-terminated `malloc` allocation.
pub(crate) fn malloc_cstring(s: &str) -> *mut c_char {
    let bytes = s.as_bytes();
    let buf = unsafe { libc::malloc(bytes.len() + 1) } as *mut u8;
    if buf.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        *buf.add(bytes.len()) = 0;
    }
    buf as *mut c_char
}

/// Take ownership of a `malloc`'d buffer produced by an upcall.
///
/// # Safety
/// `ptr` must be null or a `malloc` allocation of at least `len` bytes that
/// nobody else frees.
pub(crate) unsafe fn take_malloced(ptr: *mut c_char, len: size_t) -> Vec<u8> {
    if ptr.is_null() {
        return Vec::new();
    }
    let out = bytes(ptr, len).to_vec();
    libc::free(ptr as *mut libc::c_void);
    out
}

/// Take ownership of a `malloc`'d NUL-terminated string produced by an upcall.
///
/// # Safety
/// Same contract as [`take_malloced`], for a NUL-terminated string.
pub(crate) unsafe fn take_malloced_str(ptr: *mut c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let out = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    libc::free(ptr as *mut libc::c_void);
    out
}

/// Decode a status written by this crate. Frees the message.
///
/// # Safety
/// `status.message` must be null or owned by the caller.
pub unsafe fn decode_status(status: &mut rb_status_t) -> Status {
    let message = if status.message.is_null() {
        None
    } else {
        Some(take_malloced_str(status.message))
    };
    status.message = ptr::null_mut();
    Status::new(StatusCode::from_raw(status.code), message)
}
