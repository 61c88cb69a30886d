//! Native callback objects built around user implementations.
//!
//! Each wrapper registers the user object in the [`Registry`], hands the
//! token to the matching `rb_*_create` call and owns the resulting native
//! object through a [`Handle`]. Installing a wrapper into [`Options`] gives
//! the engine its own reference, so the wrapper may be dropped right after;
//! the registration lives until the engine lets go of the last reference.
//!
//! [`Options`]: crate::Options
//! [`Registry`]: crate::Registry

use crate::handle::{Handle, HandleGuard, NativeResource};
use crate::registry::Token;
use crate::shim;
use rockbind_core::{
    AssociativeMergeOperator, Comparator, CompactionFilter, CompactionFilterFactory,
    CompactionFilterFactoryV2, CompactionFilterV2, FilterPolicy, MergeOperator, Result,
    SliceTransform,
};
use rockbind_native as ffi;
use std::sync::Arc;

macro_rules! native_resource {
    ($($ty:ty => $kind:literal, $destroy:path;)*) => {
        $(
            impl NativeResource for $ty {
                const KIND: &'static str = $kind;

                unsafe fn destroy(raw: *mut Self) {
                    $destroy(raw)
                }
            }
        )*
    };
}

native_resource! {
    ffi::rb_comparator_t => "comparator", ffi::rb_comparator_destroy;
    ffi::rb_filterpolicy_t => "filter_policy", ffi::rb_filterpolicy_destroy;
    ffi::rb_compactionfilter_t => "compaction_filter", ffi::rb_compactionfilter_destroy;
    ffi::rb_compactionfilterv2_t => "compaction_filter_v2", ffi::rb_compactionfilterv2_destroy;
    ffi::rb_compactionfilterfactory_t =>
        "compaction_filter_factory", ffi::rb_compactionfilterfactory_destroy;
    ffi::rb_compactionfilterfactoryv2_t =>
        "compaction_filter_factory_v2", ffi::rb_compactionfilterfactoryv2_destroy;
    ffi::rb_mergeoperator_t => "merge_operator", ffi::rb_mergeoperator_destroy;
    ffi::rb_slicetransform_t => "slice_transform", ffi::rb_slicetransform_destroy;
}

macro_rules! callback_wrapper {
    ($(#[$meta:meta])* $name:ident($raw:ty)) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name {
            handle: Handle<$raw>,
            token: Option<Token>,
        }

        impl $name {
            fn registered((token, raw): (Token, *mut $raw)) -> Self {
                Self {
                    handle: Handle::owned(raw),
                    token: Some(token),
                }
            }

            /// The registry token, `None` for builtin objects.
            pub fn token(&self) -> Option<Token> {
                self.token
            }

            /// Drop this wrapper's reference to the native object.
            pub fn close(&self) {
                self.handle.close();
            }

            pub(crate) fn raw(&self) -> Result<HandleGuard<'_, $raw>> {
                self.handle.require()
            }
        }
    };
}

callback_wrapper! {
    /// A key ordering. Every column family of a database must be reopened
    /// with a comparator of the same name.
    NativeComparator(ffi::rb_comparator_t)
}

impl NativeComparator {
    pub fn new<C: Comparator + 'static>(cmp: C) -> Self {
        Self::from_arc(Arc::new(cmp))
    }

    pub fn from_arc(cmp: Arc<dyn Comparator>) -> Self {
        Self::registered(shim::comparator::create(cmp))
    }

    /// The engine's default byte-wise order.
    pub fn bytewise() -> Self {
        Self {
            handle: Handle::borrowed(ffi::rb_comparator_bytewise()),
            token: None,
        }
    }

    pub fn reverse_bytewise() -> Self {
        Self {
            handle: Handle::borrowed(ffi::rb_comparator_reverse_bytewise()),
            token: None,
        }
    }
}

callback_wrapper! {
    /// Filters built per table and consulted on point lookups.
    NativeFilterPolicy(ffi::rb_filterpolicy_t)
}

impl NativeFilterPolicy {
    pub fn new<P: FilterPolicy + 'static>(policy: P) -> Self {
        Self::registered(shim::filter_policy::create(Arc::new(policy)))
    }

    /// The engine's builtin bloom filter with `bits_per_key` bits per key.
    /// Runs entirely on the native side.
    pub fn bloom(bits_per_key: i32) -> Self {
        Self {
            handle: Handle::owned(ffi::rb_filterpolicy_create_bloom(bits_per_key)),
            token: None,
        }
    }
}

callback_wrapper! {
    NativeCompactionFilter(ffi::rb_compactionfilter_t)
}

impl NativeCompactionFilter {
    pub fn new<F: CompactionFilter + 'static>(filter: F) -> Self {
        Self::registered(shim::compaction_filter::create(Arc::new(filter)))
    }
}

callback_wrapper! {
    NativeCompactionFilterV2(ffi::rb_compactionfilterv2_t)
}

impl NativeCompactionFilterV2 {
    pub fn new<F: CompactionFilterV2 + 'static>(filter: F) -> Self {
        Self::registered(shim::compaction_filter::create_v2(Arc::new(filter)))
    }
}

callback_wrapper! {
    /// Creates one compaction filter per compaction run.
    NativeCompactionFilterFactory(ffi::rb_compactionfilterfactory_t)
}

impl NativeCompactionFilterFactory {
    pub fn new<F: CompactionFilterFactory + 'static>(factory: F) -> Self {
        Self::registered(shim::compaction_filter::create_factory(Arc::new(factory)))
    }
}

callback_wrapper! {
    /// Creates one batch compaction filter per compaction run. Batches are
    /// runs of keys sharing a prefix under the factory's
    /// [`CompactionFilterFactoryV2::prefix_extractor`], which the engine
    /// fetches once when the wrapper is created.
    NativeCompactionFilterFactoryV2(ffi::rb_compactionfilterfactoryv2_t)
}

impl NativeCompactionFilterFactoryV2 {
    pub fn new<F: CompactionFilterFactoryV2 + 'static>(factory: F) -> Self {
        Self::registered(shim::compaction_filter::create_factory_v2(Arc::new(factory)))
    }
}

callback_wrapper! {
    NativeMergeOperator(ffi::rb_mergeoperator_t)
}

impl NativeMergeOperator {
    pub fn new<M: MergeOperator + 'static>(op: M) -> Self {
        Self::registered(shim::merge_operator::create(Arc::new(op)))
    }

    /// Full and partial merges are both derived from `op.merge`.
    pub fn associative<M: AssociativeMergeOperator + 'static>(op: M) -> Self {
        Self::registered(shim::merge_operator::create_associative(Arc::new(op)))
    }
}

callback_wrapper! {
    /// Prefix extractor used by prefix iteration and by batch compaction
    /// filters.
    NativeSliceTransform(ffi::rb_slicetransform_t)
}

impl NativeSliceTransform {
    pub fn new<T: SliceTransform + 'static>(transform: T) -> Self {
        Self::registered(shim::slice_transform::create(Arc::new(transform)))
    }

    /// Builtin transform keeping the first `len` bytes of a key.
    pub fn fixed_prefix(len: usize) -> Self {
        Self {
            handle: Handle::owned(ffi::rb_slicetransform_create_fixed_prefix(len)),
            token: None,
        }
    }

    pub fn noop() -> Self {
        Self {
            handle: Handle::borrowed(ffi::rb_slicetransform_noop()),
            token: None,
        }
    }

    pub fn name(&self) -> String {
        let handle = self.handle.get();
        unsafe { crate::marshal::take_string(ffi::rb_slicetransform_name(handle.as_ptr())) }
            .unwrap_or_default()
    }

    /// Apply the native transform. `None` when `key` is outside its domain.
    pub fn transform<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
        let (mut offset, mut len) = (0, 0);
        let handle = self.handle.get();
        let in_domain = unsafe {
            ffi::rb_slicetransform_transform(
                handle.as_ptr(),
                crate::marshal::as_c(key),
                key.len(),
                &mut offset,
                &mut len,
            )
        };
        if in_domain == 0 {
            return None;
        }
        key.get(offset..offset.checked_add(len)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use rockbind_core::BytewiseComparator;

    struct Upper;

    impl SliceTransform for Upper {
        fn name(&self) -> &str {
            "test.Upper"
        }

        fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
            let end = key.iter().take_while(|b| b.is_ascii_uppercase()).count();
            &key[..end]
        }

        fn in_domain(&self, key: &[u8]) -> bool {
            key.first().is_some_and(u8::is_ascii_uppercase)
        }
    }

    #[test]
    fn test_wrapper_registration_follows_native_lifetime() {
        let cmp = NativeComparator::new(BytewiseComparator);
        let token = cmp.token().unwrap();
        assert!(Registry::global().contains(token));
        cmp.close();
        assert!(!Registry::global().contains(token));
        drop(cmp);
    }

    #[test]
    fn test_builtins_have_no_token() {
        assert!(NativeComparator::bytewise().token().is_none());
        assert!(NativeSliceTransform::noop().token().is_none());
        assert!(NativeFilterPolicy::bloom(10).token().is_none());
        assert_eq!(NativeSliceTransform::fixed_prefix(2).name(), "rockbind.FixedPrefix");
    }

    #[test]
    fn test_user_transform_through_native_object() {
        let transform = NativeSliceTransform::new(Upper);
        assert_eq!(transform.name(), "test.Upper");
        assert_eq!(transform.transform(b"ABcd"), Some(&b"AB"[..]));
        assert_eq!(transform.transform(b"abcd"), None);
    }
}
