use super::{destructor, guarded, name, resolve, slice_transform};
use crate::marshal::{malloc_bytes, slice, slices};
use crate::registry::{Callback, Registry, Token};
use libc::{c_char, c_int, c_uchar, c_void, size_t};
use rockbind_core::{
    CompactionFilter, CompactionFilterContext, CompactionFilterFactory, CompactionFilterFactoryV2,
    CompactionFilterV2, Decision,
};
use rockbind_native as ffi;
use std::ptr;
use std::sync::Arc;

pub(crate) fn create(
    filter: Arc<dyn CompactionFilter>,
) -> (Token, *mut ffi::rb_compactionfilter_t) {
    let token = Registry::global().register(Callback::CompactionFilter(filter));
    let raw = unsafe {
        ffi::rb_compactionfilter_create(
            token.as_state(),
            Some(destructor),
            Some(filter_shim),
            Some(name),
        )
    };
    (token, raw)
}

pub(crate) fn create_v2(
    filter: Arc<dyn CompactionFilterV2>,
) -> (Token, *mut ffi::rb_compactionfilterv2_t) {
    let token = Registry::global().register(Callback::CompactionFilterV2(filter));
    let raw = unsafe {
        ffi::rb_compactionfilterv2_create(
            token.as_state(),
            Some(destructor),
            Some(filter_v2_shim),
            Some(name),
        )
    };
    (token, raw)
}

pub(crate) fn create_factory(
    factory: Arc<dyn CompactionFilterFactory>,
) -> (Token, *mut ffi::rb_compactionfilterfactory_t) {
    let token = Registry::global().register(Callback::CompactionFilterFactory(factory));
    let raw = unsafe {
        ffi::rb_compactionfilterfactory_create(
            token.as_state(),
            Some(destructor),
            Some(create_compaction_filter),
            Some(name),
        )
    };
    (token, raw)
}

pub(crate) fn create_factory_v2(
    factory: Arc<dyn CompactionFilterFactoryV2>,
) -> (Token, *mut ffi::rb_compactionfilterfactoryv2_t) {
    let token = Registry::global().register(Callback::CompactionFilterFactoryV2(factory));
    let raw = unsafe {
        ffi::rb_compactionfilterfactoryv2_create(
            token.as_state(),
            Some(destructor),
            Some(create_compaction_filter_v2),
            Some(prefix_extractor),
            Some(name),
        )
    };
    (token, raw)
}

/// Write one decision into the native output slots. Returns `removed`.
unsafe fn write_decision(
    decision: Decision,
    new_value: *mut *mut c_char,
    new_value_len: *mut size_t,
    value_changed: *mut c_uchar,
) -> c_uchar {
    match decision {
        Decision::Keep => 0,
        Decision::Remove => 1,
        Decision::Change(value) => {
            if !new_value.is_null() {
                *new_value = malloc_bytes(&value, new_value_len);
            }
            if !value_changed.is_null() {
                *value_changed = 1;
            }
            0
        }
    }
}

fn level_of(level: c_int) -> u32 {
    u32::try_from(level).unwrap_or(0)
}

/// A miss keeps the entry.
pub(crate) unsafe extern "C" fn filter_shim(
    state: *mut c_void,
    level: c_int,
    key: *const c_char,
    key_len: size_t,
    existing_value: *const c_char,
    existing_value_len: size_t,
    new_value: *mut *mut c_char,
    new_value_len: *mut size_t,
    value_changed: *mut c_uchar,
) -> c_uchar {
    let (key, existing) = (slice(key, key_len), slice(existing_value, existing_value_len));
    let decision = guarded("compaction_filter.filter", Decision::Keep, || {
        resolve("compaction_filter.filter", state, Registry::compaction_filter)
            .map(|filter| filter.filter(level_of(level), key, existing))
            .unwrap_or_default()
    });
    write_decision(decision, new_value, new_value_len, value_changed)
}

/// A miss, or a callback returning the wrong number of decisions, keeps
/// every entry.
pub(crate) unsafe extern "C" fn filter_v2_shim(
    state: *mut c_void,
    level: c_int,
    keys: *const *const c_char,
    key_lens: *const size_t,
    values: *const *const c_char,
    value_lens: *const size_t,
    num_entries: size_t,
    new_values: *mut *mut c_char,
    new_value_lens: *mut size_t,
    values_changed: *mut c_uchar,
    removed: *mut c_uchar,
) {
    let keys = slices(keys, key_lens, num_entries);
    let values = slices(values, value_lens, num_entries);
    if keys.len() != num_entries || values.len() != num_entries || removed.is_null() {
        return;
    }
    let decisions = guarded("compaction_filter_v2.filter", Vec::new(), || {
        resolve("compaction_filter_v2.filter", state, Registry::compaction_filter_v2)
            .map(|filter| filter.filter(level_of(level), &keys, &values))
            .unwrap_or_default()
    });
    if decisions.len() != num_entries {
        if !decisions.is_empty() {
            tracing::error!(
                expected = num_entries,
                got = decisions.len(),
                "compaction filter returned the wrong number of decisions"
            );
        }
        return;
    }
    for (i, decision) in decisions.into_iter().enumerate() {
        *removed.add(i) = write_decision(
            decision,
            if new_values.is_null() { ptr::null_mut() } else { new_values.add(i) },
            if new_value_lens.is_null() { ptr::null_mut() } else { new_value_lens.add(i) },
            if values_changed.is_null() { ptr::null_mut() } else { values_changed.add(i) },
        );
    }
}

fn context_of(context: *const ffi::rb_compactionfiltercontext_t) -> CompactionFilterContext {
    unsafe { context.as_ref() }
        .map(CompactionFilterContext::from)
        .unwrap_or_default()
}

/// Creates the per-run filter and registers it under a fresh token. The
/// engine owns the returned object; destroying it unregisters the token.
pub(crate) unsafe extern "C" fn create_compaction_filter(
    state: *mut c_void,
    context: *const ffi::rb_compactionfiltercontext_t,
) -> *mut ffi::rb_compactionfilter_t {
    let context = context_of(context);
    guarded("compaction_filter_factory.create", ptr::null_mut(), || {
        match resolve(
            "compaction_filter_factory.create",
            state,
            Registry::compaction_filter_factory,
        ) {
            Some(factory) => create(Arc::from(factory.create_compaction_filter(&context))).1,
            None => ptr::null_mut(),
        }
    })
}

pub(crate) unsafe extern "C" fn create_compaction_filter_v2(
    state: *mut c_void,
    context: *const ffi::rb_compactionfiltercontext_t,
) -> *mut ffi::rb_compactionfilterv2_t {
    let context = context_of(context);
    guarded("compaction_filter_factory_v2.create", ptr::null_mut(), || {
        match resolve(
            "compaction_filter_factory_v2.create",
            state,
            Registry::compaction_filter_factory_v2,
        ) {
            Some(factory) => create_v2(Arc::from(factory.create_compaction_filter_v2(&context))).1,
            None => ptr::null_mut(),
        }
    })
}

/// Hands the engine a native copy of the factory's extractor. The engine
/// owns it; destroying it unregisters the transform's token. A miss returns
/// null and the engine batches by whole key.
pub(crate) unsafe extern "C" fn prefix_extractor(
    state: *mut c_void,
) -> *mut ffi::rb_slicetransform_t {
    guarded("compaction_filter_factory_v2.prefix_extractor", ptr::null_mut(), || {
        match resolve(
            "compaction_filter_factory_v2.prefix_extractor",
            state,
            Registry::compaction_filter_factory_v2,
        ) {
            Some(factory) => slice_transform::create(factory.prefix_extractor()).1,
            None => ptr::null_mut(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::{as_c, take_bytes};
    use rockbind_core::{FixedPrefixTransform, SliceTransform};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RemoveBar;

    impl CompactionFilter for RemoveBar {
        fn name(&self) -> &str {
            "test.RemoveBar"
        }

        fn filter(&self, _level: u32, key: &[u8], value: &[u8]) -> Decision {
            match key {
                b"bar" => Decision::Remove,
                b"baz" => Decision::Change([value, &b"!"[..]].concat()),
                _ => Decision::Keep,
            }
        }
    }

    unsafe fn run(token: Token, key: &[u8], value: &[u8]) -> (c_uchar, c_uchar, Vec<u8>) {
        let mut new_value: *mut c_char = ptr::null_mut();
        let mut new_len: size_t = 0;
        let mut changed: c_uchar = 0;
        let removed = filter_shim(
            token.as_state(),
            0,
            as_c(key),
            key.len(),
            as_c(value),
            value.len(),
            &mut new_value,
            &mut new_len,
            &mut changed,
        );
        (removed, changed, take_bytes(new_value, new_len))
    }

    #[test]
    fn test_filter_decisions() {
        let token = Registry::global().register(Callback::CompactionFilter(Arc::new(RemoveBar)));
        unsafe {
            assert_eq!(run(token, b"bar", b"v"), (1, 0, Vec::new()));
            assert_eq!(run(token, b"foo", b"v"), (0, 0, Vec::new()));
            assert_eq!(run(token, b"baz", b"v"), (0, 1, b"v!".to_vec()));
        }
        Registry::global().unregister(token);
        unsafe {
            assert_eq!(run(token, b"bar", b"v"), (0, 0, Vec::new()));
        }
    }

    struct DropEven;

    impl CompactionFilterV2 for DropEven {
        fn name(&self) -> &str {
            "test.DropEven"
        }

        fn filter(&self, _level: u32, keys: &[&[u8]], _values: &[&[u8]]) -> Vec<Decision> {
            keys.iter()
                .map(|k| match k.last() {
                    Some(b) if b % 2 == 0 => Decision::Remove,
                    _ => Decision::Keep,
                })
                .collect()
        }
    }

    #[test]
    fn test_filter_v2_batch() {
        let token = Registry::global().register(Callback::CompactionFilterV2(Arc::new(DropEven)));
        let keys: [&[u8]; 3] = [b"k1", b"k2", b"k3"];
        let key_ptrs: Vec<_> = keys.iter().map(|k| as_c(k)).collect();
        let lens: Vec<size_t> = keys.iter().map(|k| k.len()).collect();
        let mut new_values = vec![ptr::null_mut(); 3];
        let mut new_lens = vec![0; 3];
        let mut changed = vec![0; 3];
        let mut removed = vec![0; 3];
        unsafe {
            filter_v2_shim(
                token.as_state(),
                0,
                key_ptrs.as_ptr(),
                lens.as_ptr(),
                key_ptrs.as_ptr(),
                lens.as_ptr(),
                3,
                new_values.as_mut_ptr(),
                new_lens.as_mut_ptr(),
                changed.as_mut_ptr(),
                removed.as_mut_ptr(),
            );
        }
        // '1' and '3' are odd bytes, '2' is even
        assert_eq!(removed, vec![0, 1, 0]);
        assert_eq!(changed, vec![0, 0, 0]);
        Registry::global().unregister(token);
    }

    static PER_RUN_DROPS: AtomicUsize = AtomicUsize::new(0);

    struct PerRun;

    impl CompactionFilter for PerRun {
        fn name(&self) -> &str {
            "test.PerRun"
        }

        fn filter(&self, level: u32, key: &[u8], value: &[u8]) -> Decision {
            RemoveBar.filter(level, key, value)
        }
    }

    impl Drop for PerRun {
        fn drop(&mut self) {
            PER_RUN_DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Factory;

    impl CompactionFilterFactory for Factory {
        fn name(&self) -> &str {
            "test.Factory"
        }

        fn create_compaction_filter(
            &self,
            context: &CompactionFilterContext,
        ) -> Box<dyn CompactionFilter> {
            assert!(context.is_manual_compaction);
            Box::new(PerRun)
        }
    }

    #[test]
    fn test_factory_registers_per_run_filter() {
        let token =
            Registry::global().register(Callback::CompactionFilterFactory(Arc::new(Factory)));
        let context = ffi::rb_compactionfiltercontext_t {
            is_full_compaction: 1,
            is_manual_compaction: 1,
        };
        unsafe {
            let filter = create_compaction_filter(token.as_state(), &context);
            assert!(!filter.is_null());
            let filter = &*filter;
            assert_eq!(filter.name(), "test.PerRun");
            assert_eq!(filter.filter(0, b"bar", b"v"), Decision::Remove);
            assert_eq!(PER_RUN_DROPS.load(Ordering::SeqCst), 0);

            ffi::rb_compactionfilter_destroy(filter as *const _ as *mut _);
        }
        // Destroying the native filter unregistered its token
        assert_eq!(PER_RUN_DROPS.load(Ordering::SeqCst), 1);
        Registry::global().unregister(token);
    }

    struct PrefixedFactory;

    impl CompactionFilterFactoryV2 for PrefixedFactory {
        fn name(&self) -> &str {
            "test.PrefixedFactory"
        }

        fn create_compaction_filter_v2(
            &self,
            _context: &CompactionFilterContext,
        ) -> Box<dyn CompactionFilterV2> {
            Box::new(DropEven)
        }

        fn prefix_extractor(&self) -> Arc<dyn SliceTransform> {
            Arc::new(FixedPrefixTransform::new(2))
        }
    }

    #[test]
    fn test_factory_hands_over_its_prefix_extractor() {
        let factory: Arc<dyn CompactionFilterFactoryV2> = Arc::new(PrefixedFactory);
        let token = Registry::global().register(Callback::CompactionFilterFactoryV2(factory));
        let key = b"abcd";
        let (mut offset, mut len) = (0, 0);
        unsafe {
            let transform = prefix_extractor(token.as_state());
            assert!(!transform.is_null());
            let in_domain = ffi::rb_slicetransform_transform(
                transform,
                as_c(key),
                key.len(),
                &mut offset,
                &mut len,
            );
            assert_eq!((in_domain, offset, len), (1, 0, 2));
            ffi::rb_slicetransform_destroy(transform);
        }
        Registry::global().unregister(token);
        assert!(unsafe { prefix_extractor(token.as_state()) }.is_null());
    }
}
