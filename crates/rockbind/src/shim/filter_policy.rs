use super::{destructor, guarded, name, resolve};
use crate::marshal::{malloc_bytes, slice, slices};
use crate::registry::{Callback, Registry, Token};
use libc::{c_char, c_int, c_uchar, c_void, size_t};
use rockbind_core::FilterPolicy;
use rockbind_native as ffi;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

/// Builders and readers are registered like any other callback; their
/// token doubles as the opaque handle the engine passes back.
static BITS: ffi::rb_filterbits_callbacks_t = ffi::rb_filterbits_callbacks_t {
    create_builder: Some(create_bits_builder),
    builder_add_key: Some(bits_builder_add_key),
    builder_finish: Some(bits_builder_finish),
    builder_destroy: Some(destructor),
    create_reader: Some(create_bits_reader),
    reader_may_match: Some(bits_reader_may_match),
    reader_destroy: Some(destructor),
};

pub(crate) fn create(policy: Arc<dyn FilterPolicy>) -> (Token, *mut ffi::rb_filterpolicy_t) {
    let token = Registry::global().register(Callback::FilterPolicy(policy));
    let raw = unsafe {
        ffi::rb_filterpolicy_create(
            token.as_state(),
            Some(destructor),
            Some(create_filter),
            Some(key_may_match),
            Some(name),
            &BITS,
        )
    };
    (token, raw)
}

/// A miss yields an empty filter.
pub(crate) unsafe extern "C" fn create_filter(
    state: *mut c_void,
    keys: *const *const c_char,
    key_lens: *const size_t,
    num_keys: c_int,
    filter_len: *mut size_t,
) -> *mut c_char {
    let keys = slices(keys, key_lens, usize::try_from(num_keys).unwrap_or(0));
    guarded("filter_policy.create_filter", ptr::null_mut(), || {
        let filter = resolve("filter_policy.create_filter", state, Registry::filter_policy)
            .map(|policy| policy.create_filter(&keys))
            .unwrap_or_default();
        malloc_bytes(&filter, filter_len)
    })
}

/// A miss answers "may match" so lookups never skip a present key.
pub(crate) unsafe extern "C" fn key_may_match(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    filter: *const c_char,
    filter_len: size_t,
) -> c_uchar {
    let (key, filter) = (slice(key, key_len), slice(filter, filter_len));
    guarded("filter_policy.key_may_match", 1, || {
        resolve("filter_policy.key_may_match", state, Registry::filter_policy)
            .map_or(1, |policy| policy.key_may_match(key, filter) as c_uchar)
    })
}

/// Null when the policy has no full-filter builder; the engine then uses
/// `create_filter`.
pub(crate) unsafe extern "C" fn create_bits_builder(state: *mut c_void) -> *mut c_void {
    guarded("filter_policy.create_bits_builder", ptr::null_mut(), || {
        let Some(builder) = resolve(
            "filter_policy.create_bits_builder",
            state,
            Registry::filter_policy,
        )
        .and_then(|policy| policy.bits_builder()) else {
            return ptr::null_mut();
        };
        Registry::global()
            .register(Callback::FilterBitsBuilder(Arc::new(Mutex::new(builder))))
            .as_state()
    })
}

pub(crate) unsafe extern "C" fn bits_builder_add_key(
    builder: *mut c_void,
    key: *const c_char,
    key_len: size_t,
) {
    let key = slice(key, key_len);
    guarded("filter_policy.bits_builder_add_key", (), || {
        if let Some(builder) =
            resolve("filter_policy.bits_builder_add_key", builder, Registry::filter_bits_builder)
        {
            builder
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .add_key(key);
        }
    })
}

pub(crate) unsafe extern "C" fn bits_builder_finish(
    builder: *mut c_void,
    out_len: *mut size_t,
) -> *mut c_char {
    guarded("filter_policy.bits_builder_finish", ptr::null_mut(), || {
        let filter = resolve(
            "filter_policy.bits_builder_finish",
            builder,
            Registry::filter_bits_builder,
        )
        .map(|builder| builder.lock().unwrap_or_else(PoisonError::into_inner).finish())
        .unwrap_or_default();
        malloc_bytes(&filter, out_len)
    })
}

pub(crate) unsafe extern "C" fn create_bits_reader(
    state: *mut c_void,
    contents: *const c_char,
    len: size_t,
) -> *mut c_void {
    let contents = slice(contents, len);
    guarded("filter_policy.create_bits_reader", ptr::null_mut(), || {
        let Some(reader) = resolve(
            "filter_policy.create_bits_reader",
            state,
            Registry::filter_policy,
        )
        .and_then(|policy| policy.bits_reader(contents)) else {
            return ptr::null_mut();
        };
        Registry::global()
            .register(Callback::FilterBitsReader(Arc::from(reader)))
            .as_state()
    })
}

pub(crate) unsafe extern "C" fn bits_reader_may_match(
    reader: *mut c_void,
    key: *const c_char,
    key_len: size_t,
) -> c_uchar {
    let key = slice(key, key_len);
    guarded("filter_policy.bits_reader_may_match", 1, || {
        resolve("filter_policy.bits_reader_may_match", reader, Registry::filter_bits_reader)
            .map_or(1, |reader| reader.may_match(key) as c_uchar)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{as_c, take_bytes};
    use rockbind_core::{FilterBitsBuilder, FilterBitsReader};

    /// Filter is the sorted list of first key bytes.
    struct FirstByte;

    struct FirstByteBuilder(Vec<u8>);

    impl FilterBitsBuilder for FirstByteBuilder {
        fn add_key(&mut self, key: &[u8]) {
            self.0.extend(key.first());
        }

        fn finish(&mut self) -> Vec<u8> {
            let mut bits = std::mem::take(&mut self.0);
            bits.sort_unstable();
            bits
        }
    }

    struct FirstByteReader(Vec<u8>);

    impl FilterBitsReader for FirstByteReader {
        fn may_match(&self, key: &[u8]) -> bool {
            key.first().map_or(true, |b| self.0.contains(b))
        }
    }

    impl FilterPolicy for FirstByte {
        fn name(&self) -> &str {
            "test.FirstByte"
        }

        fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
            keys.iter().filter_map(|k| k.first().copied()).collect()
        }

        fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
            key.first().map_or(true, |b| filter.contains(b))
        }

        fn bits_builder(&self) -> Option<Box<dyn FilterBitsBuilder>> {
            Some(Box::new(FirstByteBuilder(Vec::new())))
        }

        fn bits_reader(&self, contents: &[u8]) -> Option<Box<dyn FilterBitsReader>> {
            Some(Box::new(FirstByteReader(contents.to_vec())))
        }
    }

    #[test]
    fn test_create_filter_and_match() {
        let token = Registry::global().register(Callback::FilterPolicy(Arc::new(FirstByte)));
        let keys: [&[u8]; 2] = [b"apple", b"cherry"];
        let ptrs: Vec<_> = keys.iter().map(|k| as_c(k)).collect();
        let lens: Vec<_> = keys.iter().map(|k| k.len()).collect();
        let mut len: size_t = 0;
        unsafe {
            let raw = create_filter(token.as_state(), ptrs.as_ptr(), lens.as_ptr(), 2, &mut len);
            let filter = take_bytes(raw, len);
            assert_eq!(filter, b"ac");

            let matches = |key: &[u8]| {
                key_may_match(token.as_state(), as_c(key), key.len(), as_c(&filter), filter.len())
            };
            assert_eq!(matches(b"avocado"), 1);
            assert_eq!(matches(b"banana"), 0);
        }
        Registry::global().unregister(token);
        unsafe {
            assert_eq!(key_may_match(token.as_state(), as_c(b"b"), 1, ptr::null(), 0), 1);
        }
    }

    #[test]
    fn test_bits_builder_and_reader_are_registered() {
        let token = Registry::global().register(Callback::FilterPolicy(Arc::new(FirstByte)));
        let mut len: size_t = 0;
        unsafe {
            let builder = create_bits_builder(token.as_state());
            let builder_token = Token::from_state(builder).unwrap();
            assert!(Registry::global().contains(builder_token));

            bits_builder_add_key(builder, as_c(b"zebra"), 5);
            bits_builder_add_key(builder, as_c(b"ant"), 3);
            let bits = take_bytes(bits_builder_finish(builder, &mut len), len);
            assert_eq!(bits, b"az");
            destructor(builder);
            assert!(!Registry::global().contains(builder_token));

            let reader = create_bits_reader(token.as_state(), as_c(&bits), bits.len());
            assert_eq!(bits_reader_may_match(reader, as_c(b"zoo"), 3), 1);
            assert_eq!(bits_reader_may_match(reader, as_c(b"moo"), 3), 0);
            destructor(reader);
        }
        Registry::global().unregister(token);
    }
}
