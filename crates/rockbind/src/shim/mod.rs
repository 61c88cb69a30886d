//! `extern "C"` upcalls the native engine invokes on registered callbacks.
//!
//! Every shim resolves its `state` token through [`Registry::global`],
//! borrows the native buffers, calls the user callback and converts the
//! result back. Shims never unwind into the engine: a panic in user code or
//! a token that does not resolve is logged and answered with the shim's
//! conservative fallback.

pub(crate) mod comparator;
pub(crate) mod compaction_filter;
pub(crate) mod filter_policy;
pub(crate) mod merge_operator;
pub(crate) mod slice_transform;

use crate::marshal::malloc_cstring;
use crate::registry::{Registry, Token};
use libc::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};

/// Run `f`, turning a panic into `fallback`.
pub(crate) fn guarded<T>(shim: &'static str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            tracing::error!(shim, panic = %message, "callback panicked, using fallback");
            fallback
        }
    }
}

/// Resolve `state` with a typed registry lookup, logging a miss.
pub(crate) fn resolve<T>(
    shim: &'static str,
    state: *mut c_void,
    lookup: impl FnOnce(&Registry, Token) -> Option<T>,
) -> Option<T> {
    let Some(token) = Token::from_state(state) else {
        tracing::error!(shim, "upcall without a callback token");
        return None;
    };
    let found = lookup(Registry::global(), token);
    if found.is_none() {
        tracing::error!(shim, %token, "callback token not registered for this upcall");
    }
    found
}

/// Destructor upcall shared by every callback kind.
pub(crate) unsafe extern "C" fn destructor(state: *mut c_void) {
    let Some(token) = Token::from_state(state) else {
        return;
    };
    if !Registry::global().unregister(token) {
        tracing::warn!(%token, "destructor for a token that was not registered");
    }
}

/// Name upcall shared by every callback kind.
pub(crate) unsafe extern "C" fn name(state: *mut c_void) -> *mut c_char {
    guarded("name", std::ptr::null_mut(), || {
        let name = resolve("name", state, |registry, token| registry.lookup(token))
            .map(|callback| callback.name())
            .unwrap_or_default();
        malloc_cstring(&name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::take_string;
    use crate::registry::Callback;
    use rockbind_core::BytewiseComparator;
    use std::sync::Arc;

    #[test]
    fn test_guarded_catches_panics() {
        assert_eq!(guarded("test", 7, || 1), 1);
        assert_eq!(guarded("test", 7, || panic!("boom")), 7);
    }

    #[test]
    fn test_name_and_destructor_shims() {
        let token = Registry::global().register(Callback::Comparator(Arc::new(BytewiseComparator)));
        let name = unsafe { take_string(name(token.as_state())) };
        assert_eq!(name.as_deref(), Some("rockbind.BytewiseComparator"));

        unsafe { destructor(token.as_state()) };
        assert!(!Registry::global().contains(token));

        // Misses answer with an empty name
        let name = unsafe { take_string(super::name(token.as_state())) };
        assert_eq!(name.as_deref(), Some(""));
    }
}
