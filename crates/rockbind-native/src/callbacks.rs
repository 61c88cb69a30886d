//! Callback objects supplied by the embedder.
//!
//! Each `rb_*_create` constructor takes an opaque `state` pointer, a
//! `destructor` and a set of function pointers. The resulting object adapts
//! those upcalls to the engine's capability traits and is shared internally
//! through an `Arc`: options, column families and running compactions each
//! hold a clone, so the object outlives its `rb_*_destroy` call for as long as
//! the engine still uses it. The destructor upcall runs exactly once, when the
//! last clone is dropped.
//!
//! Variable-length results returned by upcalls (names, filters, merge
//! results, separators) are `malloc` allocations owned by the engine after
//! the call, which releases them with `free`.

use crate::raw::{bytes, malloc_cstring, take_malloced, take_malloced_str};
use libc::{c_char, c_int, c_uchar, c_void, size_t};
use rockbind_core::{
    BloomFilterPolicy, BytewiseComparator, Comparator, CompactionFilter, CompactionFilterContext,
    CompactionFilterFactory, CompactionFilterFactoryV2, CompactionFilterV2, Decision,
    FilterBitsBuilder, FilterBitsReader, FilterPolicy, FixedPrefixTransform, MergeOperator,
    NoopTransform, ReverseBytewiseComparator, SliceTransform,
};
use std::cmp::Ordering;
use std::ptr;
use std::sync::{Arc, OnceLock};

pub type DestructorFn = unsafe extern "C" fn(state: *mut c_void);
/// Returns a `malloc`'d NUL-terminated name.
pub type NameFn = unsafe extern "C" fn(state: *mut c_void) -> *mut c_char;

pub type CompareFn = unsafe extern "C" fn(
    state: *mut c_void,
    a: *const c_char,
    a_len: size_t,
    b: *const c_char,
    b_len: size_t,
) -> c_int;
/// Returns null to leave `start` unchanged.
pub type SeparatorFn = unsafe extern "C" fn(
    state: *mut c_void,
    start: *const c_char,
    start_len: size_t,
    limit: *const c_char,
    limit_len: size_t,
    out_len: *mut size_t,
) -> *mut c_char;
/// Returns null to leave `key` unchanged.
pub type SuccessorFn = unsafe extern "C" fn(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    out_len: *mut size_t,
) -> *mut c_char;

pub type CreateFilterFn = unsafe extern "C" fn(
    state: *mut c_void,
    keys: *const *const c_char,
    key_lens: *const size_t,
    num_keys: c_int,
    filter_len: *mut size_t,
) -> *mut c_char;
pub type KeyMayMatchFn = unsafe extern "C" fn(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    filter: *const c_char,
    filter_len: size_t,
) -> c_uchar;

pub type CompactionFilterFn = unsafe extern "C" fn(
    state: *mut c_void,
    level: c_int,
    key: *const c_char,
    key_len: size_t,
    existing_value: *const c_char,
    existing_value_len: size_t,
    new_value: *mut *mut c_char,
    new_value_len: *mut size_t,
    value_changed: *mut c_uchar,
) -> c_uchar;
/// Writes one decision per entry into the four output arrays.
pub type CompactionFilterV2Fn = unsafe extern "C" fn(
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
);
pub type CreateCompactionFilterFn = unsafe extern "C" fn(
    state: *mut c_void,
    context: *const rb_compactionfiltercontext_t,
) -> *mut rb_compactionfilter_t;
pub type CreateCompactionFilterV2Fn = unsafe extern "C" fn(
    state: *mut c_void,
    context: *const rb_compactionfiltercontext_t,
) -> *mut rb_compactionfilterv2_t;
/// Returns a freshly created transform that becomes owned by the engine.
pub type GetPrefixExtractorFn =
    unsafe extern "C" fn(state: *mut c_void) -> *mut rb_slicetransform_t;

pub type FullMergeFn = unsafe extern "C" fn(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    existing_value: *const c_char,
    existing_value_len: size_t,
    operands: *const *const c_char,
    operand_lens: *const size_t,
    num_operands: c_int,
    success: *mut c_uchar,
    new_value_len: *mut size_t,
) -> *mut c_char;
pub type PartialMergeFn = unsafe extern "C" fn(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    left: *const c_char,
    left_len: size_t,
    right: *const c_char,
    right_len: size_t,
    success: *mut c_uchar,
    new_value_len: *mut size_t,
) -> *mut c_char;
pub type PartialMergeMultiFn = unsafe extern "C" fn(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    operands: *const *const c_char,
    operand_lens: *const size_t,
    num_operands: c_int,
    success: *mut c_uchar,
    new_value_len: *mut size_t,
) -> *mut c_char;

pub type TransformFn = unsafe extern "C" fn(
    state: *mut c_void,
    key: *const c_char,
    key_len: size_t,
    prefix_offset: *mut size_t,
    prefix_len: *mut size_t,
);
pub type KeyPredicateFn =
    unsafe extern "C" fn(state: *mut c_void, key: *const c_char, key_len: size_t) -> c_uchar;

/// Full-filter upcalls. Builder and reader handles are opaque to the engine
/// and released through `builder_destroy` / `reader_destroy`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct rb_filterbits_callbacks_t {
    pub create_builder: Option<unsafe extern "C" fn(state: *mut c_void) -> *mut c_void>,
    pub builder_add_key:
        Option<unsafe extern "C" fn(builder: *mut c_void, key: *const c_char, key_len: size_t)>,
    pub builder_finish:
        Option<unsafe extern "C" fn(builder: *mut c_void, out_len: *mut size_t) -> *mut c_char>,
    pub builder_destroy: Option<DestructorFn>,
    pub create_reader: Option<
        unsafe extern "C" fn(
            state: *mut c_void,
            contents: *const c_char,
            len: size_t,
        ) -> *mut c_void,
    >,
    pub reader_may_match: Option<
        unsafe extern "C" fn(reader: *mut c_void, key: *const c_char, key_len: size_t) -> c_uchar,
    >,
    pub reader_destroy: Option<DestructorFn>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct rb_compactionfiltercontext_t {
    pub is_full_compaction: c_uchar,
    pub is_manual_compaction: c_uchar,
}

impl From<&CompactionFilterContext> for rb_compactionfiltercontext_t {
    fn from(ctx: &CompactionFilterContext) -> Self {
        Self {
            is_full_compaction: ctx.is_full_compaction as c_uchar,
            is_manual_compaction: ctx.is_manual_compaction as c_uchar,
        }
    }
}

impl From<&rb_compactionfiltercontext_t> for CompactionFilterContext {
    fn from(ctx: &rb_compactionfiltercontext_t) -> Self {
        Self {
            is_full_compaction: ctx.is_full_compaction != 0,
            is_manual_compaction: ctx.is_manual_compaction != 0,
        }
    }
}

/// Embedder state plus its destructor. Dropping runs the destructor once.
struct Foreign {
    state: *mut c_void,
    destructor: Option<DestructorFn>,
}

// The embedder guarantees its upcalls may be invoked from any thread.
unsafe impl Send for Foreign {}
unsafe impl Sync for Foreign {}

impl Foreign {
    fn new(state: *mut c_void, destructor: Option<DestructorFn>) -> Self {
        Self { state, destructor }
    }

    fn name(&self, name: Option<NameFn>) -> String {
        match name {
            Some(f) => unsafe { take_malloced_str(f(self.state)) },
            None => String::new(),
        }
    }
}

impl Drop for Foreign {
    fn drop(&mut self) {
        if let Some(destructor) = self.destructor {
            tracing::trace!(state = ?self.state, "running native callback destructor");
            unsafe { destructor(self.state) };
        }
    }
}

fn slice_ptr(data: &[u8]) -> *const c_char {
    data.as_ptr() as *const c_char
}

fn ptr_arrays(items: &[&[u8]]) -> (Vec<*const c_char>, Vec<size_t>) {
    items.iter().map(|d| (slice_ptr(d), d.len())).unzip()
}

// ---------------------------------------------------------------------------
// Comparator
// ---------------------------------------------------------------------------

struct ForeignComparator {
    foreign: Foreign,
    name: String,
    compare: CompareFn,
    separator: Option<SeparatorFn>,
    successor: Option<SuccessorFn>,
}

impl Comparator for ForeignComparator {
    fn name(&self) -> &str {
        &self.name
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let r = unsafe {
            (self.compare)(self.foreign.state, slice_ptr(a), a.len(), slice_ptr(b), b.len())
        };
        r.cmp(&0)
    }

    fn find_shortest_separator(&self, start: &[u8], limit: &[u8]) -> Option<Vec<u8>> {
        let f = self.separator?;
        let mut len: size_t = 0;
        let out = unsafe {
            f(
                self.foreign.state,
                slice_ptr(start),
                start.len(),
                slice_ptr(limit),
                limit.len(),
                &mut len,
            )
        };
        (!out.is_null()).then(|| unsafe { take_malloced(out, len) })
    }

    fn find_short_successor(&self, key: &[u8]) -> Option<Vec<u8>> {
        let f = self.successor?;
        let mut len: size_t = 0;
        let out = unsafe { f(self.foreign.state, slice_ptr(key), key.len(), &mut len) };
        (!out.is_null()).then(|| unsafe { take_malloced(out, len) })
    }
}

pub struct rb_comparator_t {
    pub(crate) inner: Arc<dyn Comparator>,
}

/// Create a comparator backed by upcalls. Returns null if `compare` is missing,
/// in which case `state` is not retained.
///
/// # Safety
/// The function pointers must remain callable with `state` until `destructor`
/// has run.
#[no_mangle]
pub unsafe extern "C" fn rb_comparator_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    compare: Option<CompareFn>,
    name: Option<NameFn>,
    find_shortest_separator: Option<SeparatorFn>,
    find_short_successor: Option<SuccessorFn>,
) -> *mut rb_comparator_t {
    let Some(compare) = compare else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    let inner = ForeignComparator {
        foreign,
        name,
        compare,
        separator: find_shortest_separator,
        successor: find_short_successor,
    };
    Box::into_raw(Box::new(rb_comparator_t {
        inner: Arc::new(inner),
    }))
}

/// # Safety
/// `cmp` must come from [`rb_comparator_create`] and not be destroyed twice.
#[no_mangle]
pub unsafe extern "C" fn rb_comparator_destroy(cmp: *mut rb_comparator_t) {
    if !cmp.is_null() {
        drop(Box::from_raw(cmp));
    }
}

/// The builtin byte-wise comparator. Static; never destroy it.
#[no_mangle]
pub extern "C" fn rb_comparator_bytewise() -> *const rb_comparator_t {
    static BYTEWISE: OnceLock<rb_comparator_t> = OnceLock::new();
    BYTEWISE.get_or_init(|| rb_comparator_t {
        inner: Arc::new(BytewiseComparator),
    })
}

/// The builtin reverse byte-wise comparator. Static; never destroy it.
#[no_mangle]
pub extern "C" fn rb_comparator_reverse_bytewise() -> *const rb_comparator_t {
    static REVERSE: OnceLock<rb_comparator_t> = OnceLock::new();
    REVERSE.get_or_init(|| rb_comparator_t {
        inner: Arc::new(ReverseBytewiseComparator),
    })
}

// ---------------------------------------------------------------------------
// Filter policy
// ---------------------------------------------------------------------------

struct ForeignFilterPolicy {
    foreign: Foreign,
    name: String,
    create_filter: CreateFilterFn,
    key_may_match: KeyMayMatchFn,
    bits: Option<rb_filterbits_callbacks_t>,
}

struct ForeignBitsBuilder {
    handle: *mut c_void,
    add_key: unsafe extern "C" fn(*mut c_void, *const c_char, size_t),
    finish: unsafe extern "C" fn(*mut c_void, *mut size_t) -> *mut c_char,
    destroy: DestructorFn,
}

unsafe impl Send for ForeignBitsBuilder {}

impl FilterBitsBuilder for ForeignBitsBuilder {
    fn add_key(&mut self, key: &[u8]) {
        unsafe { (self.add_key)(self.handle, slice_ptr(key), key.len()) }
    }

    fn finish(&mut self) -> Vec<u8> {
        let mut len: size_t = 0;
        unsafe {
            let out = (self.finish)(self.handle, &mut len);
            take_malloced(out, len)
        }
    }
}

impl Drop for ForeignBitsBuilder {
    fn drop(&mut self) {
        unsafe { (self.destroy)(self.handle) }
    }
}

struct ForeignBitsReader {
    handle: *mut c_void,
    may_match: unsafe extern "C" fn(*mut c_void, *const c_char, size_t) -> c_uchar,
    destroy: DestructorFn,
}

unsafe impl Send for ForeignBitsReader {}
unsafe impl Sync for ForeignBitsReader {}

impl FilterBitsReader for ForeignBitsReader {
    fn may_match(&self, key: &[u8]) -> bool {
        unsafe { (self.may_match)(self.handle, slice_ptr(key), key.len()) != 0 }
    }
}

impl Drop for ForeignBitsReader {
    fn drop(&mut self) {
        unsafe { (self.destroy)(self.handle) }
    }
}

impl FilterPolicy for ForeignFilterPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        let (ptrs, lens) = ptr_arrays(keys);
        let mut len: size_t = 0;
        unsafe {
            let out = (self.create_filter)(
                self.foreign.state,
                ptrs.as_ptr(),
                lens.as_ptr(),
                keys.len() as c_int,
                &mut len,
            );
            take_malloced(out, len)
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        unsafe {
            (self.key_may_match)(
                self.foreign.state,
                slice_ptr(key),
                key.len(),
                slice_ptr(filter),
                filter.len(),
            ) != 0
        }
    }

    fn bits_builder(&self) -> Option<Box<dyn FilterBitsBuilder>> {
        let bits = self.bits.as_ref()?;
        let (create, add_key, finish, destroy) = (
            bits.create_builder?,
            bits.builder_add_key?,
            bits.builder_finish?,
            bits.builder_destroy?,
        );
        let handle = unsafe { create(self.foreign.state) };
        if handle.is_null() {
            return None;
        }
        Some(Box::new(ForeignBitsBuilder {
            handle,
            add_key,
            finish,
            destroy,
        }))
    }

    fn bits_reader(&self, contents: &[u8]) -> Option<Box<dyn FilterBitsReader>> {
        let bits = self.bits.as_ref()?;
        let (create, may_match, destroy) = (
            bits.create_reader?,
            bits.reader_may_match?,
            bits.reader_destroy?,
        );
        let handle = unsafe { create(self.foreign.state, slice_ptr(contents), contents.len()) };
        if handle.is_null() {
            return None;
        }
        Some(Box::new(ForeignBitsReader {
            handle,
            may_match,
            destroy,
        }))
    }
}

pub struct rb_filterpolicy_t {
    pub(crate) inner: Arc<dyn FilterPolicy>,
}

/// Create a filter policy backed by upcalls. `bits` may be null when the
/// embedder has no full-filter implementation.
///
/// # Safety
/// See [`rb_comparator_create`]. `bits`, when non-null, is copied.
#[no_mangle]
pub unsafe extern "C" fn rb_filterpolicy_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    create_filter: Option<CreateFilterFn>,
    key_may_match: Option<KeyMayMatchFn>,
    name: Option<NameFn>,
    bits: *const rb_filterbits_callbacks_t,
) -> *mut rb_filterpolicy_t {
    let (Some(create_filter), Some(key_may_match)) = (create_filter, key_may_match) else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    let inner = ForeignFilterPolicy {
        foreign,
        name,
        create_filter,
        key_may_match,
        bits: bits.as_ref().copied(),
    };
    Box::into_raw(Box::new(rb_filterpolicy_t {
        inner: Arc::new(inner),
    }))
}

/// Builtin bloom filter policy. Owned by the caller.
#[no_mangle]
pub extern "C" fn rb_filterpolicy_create_bloom(bits_per_key: c_int) -> *mut rb_filterpolicy_t {
    let bits_per_key = usize::try_from(bits_per_key).unwrap_or(0);
    Box::into_raw(Box::new(rb_filterpolicy_t {
        inner: Arc::new(BloomFilterPolicy::new(bits_per_key)),
    }))
}

/// # Safety
/// `policy` must come from [`rb_filterpolicy_create`] or
/// [`rb_filterpolicy_create_bloom`].
#[no_mangle]
pub unsafe extern "C" fn rb_filterpolicy_destroy(policy: *mut rb_filterpolicy_t) {
    if !policy.is_null() {
        drop(Box::from_raw(policy));
    }
}

// ---------------------------------------------------------------------------
// Compaction filters
// ---------------------------------------------------------------------------

struct ForeignCompactionFilter {
    foreign: Foreign,
    name: String,
    filter: CompactionFilterFn,
}

impl CompactionFilter for ForeignCompactionFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self, level: u32, key: &[u8], existing_value: &[u8]) -> Decision {
        let mut new_value: *mut c_char = ptr::null_mut();
        let mut new_len: size_t = 0;
        let mut changed: c_uchar = 0;
        let removed = unsafe {
            (self.filter)(
                self.foreign.state,
                level as c_int,
                slice_ptr(key),
                key.len(),
                slice_ptr(existing_value),
                existing_value.len(),
                &mut new_value,
                &mut new_len,
                &mut changed,
            )
        };
        let replacement = unsafe { take_malloced(new_value, new_len) };
        if removed != 0 {
            Decision::Remove
        } else if changed != 0 {
            Decision::Change(replacement)
        } else {
            Decision::Keep
        }
    }
}

/// Per-run or shared compaction filter object.
pub struct rb_compactionfilter_t {
    pub(crate) inner: Arc<dyn CompactionFilter>,
}

impl CompactionFilter for rb_compactionfilter_t {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn filter(&self, level: u32, key: &[u8], existing_value: &[u8]) -> Decision {
        self.inner.filter(level, key, existing_value)
    }
}

/// # Safety
/// See [`rb_comparator_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilter_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    filter: Option<CompactionFilterFn>,
    name: Option<NameFn>,
) -> *mut rb_compactionfilter_t {
    let Some(filter) = filter else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    Box::into_raw(Box::new(rb_compactionfilter_t {
        inner: Arc::new(ForeignCompactionFilter {
            foreign,
            name,
            filter,
        }),
    }))
}

/// # Safety
/// `filter` must come from [`rb_compactionfilter_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilter_destroy(filter: *mut rb_compactionfilter_t) {
    if !filter.is_null() {
        drop(Box::from_raw(filter));
    }
}

struct ForeignCompactionFilterV2 {
    foreign: Foreign,
    name: String,
    filter: CompactionFilterV2Fn,
}

impl CompactionFilterV2 for ForeignCompactionFilterV2 {
    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self, level: u32, keys: &[&[u8]], existing_values: &[&[u8]]) -> Vec<Decision> {
        let n = keys.len().min(existing_values.len());
        let (key_ptrs, key_lens) = ptr_arrays(&keys[..n]);
        let (val_ptrs, val_lens) = ptr_arrays(&existing_values[..n]);
        let mut new_values: Vec<*mut c_char> = vec![ptr::null_mut(); n];
        let mut new_lens: Vec<size_t> = vec![0; n];
        let mut changed: Vec<c_uchar> = vec![0; n];
        let mut removed: Vec<c_uchar> = vec![0; n];
        unsafe {
            (self.filter)(
                self.foreign.state,
                level as c_int,
                key_ptrs.as_ptr(),
                key_lens.as_ptr(),
                val_ptrs.as_ptr(),
                val_lens.as_ptr(),
                n,
                new_values.as_mut_ptr(),
                new_lens.as_mut_ptr(),
                changed.as_mut_ptr(),
                removed.as_mut_ptr(),
            );
        }
        (0..n)
            .map(|i| {
                let replacement = unsafe { take_malloced(new_values[i], new_lens[i]) };
                if removed[i] != 0 {
                    Decision::Remove
                } else if changed[i] != 0 {
                    Decision::Change(replacement)
                } else {
                    Decision::Keep
                }
            })
            .collect()
    }
}

pub struct rb_compactionfilterv2_t {
    pub(crate) inner: Arc<dyn CompactionFilterV2>,
}

impl CompactionFilterV2 for rb_compactionfilterv2_t {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn filter(&self, level: u32, keys: &[&[u8]], existing_values: &[&[u8]]) -> Vec<Decision> {
        self.inner.filter(level, keys, existing_values)
    }
}

/// # Safety
/// See [`rb_comparator_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilterv2_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    filter: Option<CompactionFilterV2Fn>,
    name: Option<NameFn>,
) -> *mut rb_compactionfilterv2_t {
    let Some(filter) = filter else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    Box::into_raw(Box::new(rb_compactionfilterv2_t {
        inner: Arc::new(ForeignCompactionFilterV2 {
            foreign,
            name,
            filter,
        }),
    }))
}

/// # Safety
/// `filter` must come from [`rb_compactionfilterv2_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilterv2_destroy(filter: *mut rb_compactionfilterv2_t) {
    if !filter.is_null() {
        drop(Box::from_raw(filter));
    }
}

/// Stand-in when a factory declines to create a filter for a run.
struct KeepAll;

impl CompactionFilter for KeepAll {
    fn name(&self) -> &str {
        "rockbind.KeepAll"
    }

    fn filter(&self, _level: u32, _key: &[u8], _existing_value: &[u8]) -> Decision {
        Decision::Keep
    }
}

impl CompactionFilterV2 for KeepAll {
    fn name(&self) -> &str {
        "rockbind.KeepAll"
    }

    fn filter(&self, _level: u32, keys: &[&[u8]], _existing_values: &[&[u8]]) -> Vec<Decision> {
        vec![Decision::Keep; keys.len()]
    }
}

struct ForeignCompactionFilterFactory {
    foreign: Foreign,
    name: String,
    create: CreateCompactionFilterFn,
}

impl CompactionFilterFactory for ForeignCompactionFilterFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_compaction_filter(
        &self,
        context: &CompactionFilterContext,
    ) -> Box<dyn CompactionFilter> {
        let ctx = rb_compactionfiltercontext_t::from(context);
        let raw = unsafe { (self.create)(self.foreign.state, &ctx) };
        if raw.is_null() {
            tracing::warn!(factory = %self.name, "factory returned no compaction filter");
            return Box::new(KeepAll);
        }
        // Dropping the box releases the per-run filter and its destructor upcall
        unsafe { Box::from_raw(raw) }
    }
}

pub struct rb_compactionfilterfactory_t {
    pub(crate) inner: Arc<dyn CompactionFilterFactory>,
}

/// # Safety
/// See [`rb_comparator_create`]. Filters returned by `create` become owned by
/// the engine.
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilterfactory_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    create_compaction_filter: Option<CreateCompactionFilterFn>,
    name: Option<NameFn>,
) -> *mut rb_compactionfilterfactory_t {
    let Some(create) = create_compaction_filter else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    Box::into_raw(Box::new(rb_compactionfilterfactory_t {
        inner: Arc::new(ForeignCompactionFilterFactory {
            foreign,
            name,
            create,
        }),
    }))
}

/// # Safety
/// `factory` must come from [`rb_compactionfilterfactory_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilterfactory_destroy(
    factory: *mut rb_compactionfilterfactory_t,
) {
    if !factory.is_null() {
        drop(Box::from_raw(factory));
    }
}

struct ForeignCompactionFilterFactoryV2 {
    foreign: Foreign,
    name: String,
    create: CreateCompactionFilterV2Fn,
    prefix_extractor: Arc<dyn SliceTransform>,
}

impl CompactionFilterFactoryV2 for ForeignCompactionFilterFactoryV2 {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_compaction_filter_v2(
        &self,
        context: &CompactionFilterContext,
    ) -> Box<dyn CompactionFilterV2> {
        let ctx = rb_compactionfiltercontext_t::from(context);
        let raw = unsafe { (self.create)(self.foreign.state, &ctx) };
        if raw.is_null() {
            tracing::warn!(factory = %self.name, "factory returned no compaction filter");
            return Box::new(KeepAll);
        }
        unsafe { Box::from_raw(raw) }
    }

    fn prefix_extractor(&self) -> Arc<dyn SliceTransform> {
        Arc::clone(&self.prefix_extractor)
    }
}

pub struct rb_compactionfilterfactoryv2_t {
    pub(crate) inner: Arc<dyn CompactionFilterFactoryV2>,
}

/// `get_prefix_extractor` is called once, here. Its transform groups the
/// entries of every compaction run into batches; when the upcall is absent
/// or returns null, each distinct key forms its own batch.
///
/// # Safety
/// See [`rb_compactionfilterfactory_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilterfactoryv2_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    create_compaction_filter_v2: Option<CreateCompactionFilterV2Fn>,
    get_prefix_extractor: Option<GetPrefixExtractorFn>,
    name: Option<NameFn>,
) -> *mut rb_compactionfilterfactoryv2_t {
    let Some(create) = create_compaction_filter_v2 else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    let raw = match get_prefix_extractor {
        Some(get) => get(foreign.state),
        None => ptr::null_mut(),
    };
    let prefix_extractor: Arc<dyn SliceTransform> = if raw.is_null() {
        tracing::debug!(factory = %name, "no prefix extractor, batching by whole key");
        Arc::new(NoopTransform)
    } else {
        Box::from_raw(raw).inner
    };
    Box::into_raw(Box::new(rb_compactionfilterfactoryv2_t {
        inner: Arc::new(ForeignCompactionFilterFactoryV2 {
            foreign,
            name,
            create,
            prefix_extractor,
        }),
    }))
}

/// # Safety
/// `factory` must come from [`rb_compactionfilterfactoryv2_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_compactionfilterfactoryv2_destroy(
    factory: *mut rb_compactionfilterfactoryv2_t,
) {
    if !factory.is_null() {
        drop(Box::from_raw(factory));
    }
}

// ---------------------------------------------------------------------------
// Merge operator
// ---------------------------------------------------------------------------

struct ForeignMergeOperator {
    foreign: Foreign,
    name: String,
    full_merge: FullMergeFn,
    partial_merge: Option<PartialMergeFn>,
    partial_merge_multi: Option<PartialMergeMultiFn>,
}

fn merge_result(out: *mut c_char, success: c_uchar, len: size_t) -> Option<Vec<u8>> {
    // A result buffer is owned by us even when the upcall reports failure
    let value = unsafe { take_malloced(out, len) };
    (success != 0 && !out.is_null()).then_some(value)
}

impl MergeOperator for ForeignMergeOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_merge(
        &self,
        key: &[u8],
        existing_value: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        let (ptrs, lens) = ptr_arrays(operands);
        let (existing, existing_len) = match existing_value {
            Some(v) => (slice_ptr(v), v.len()),
            None => (ptr::null(), 0),
        };
        let mut success: c_uchar = 0;
        let mut len: size_t = 0;
        let out = unsafe {
            (self.full_merge)(
                self.foreign.state,
                slice_ptr(key),
                key.len(),
                existing,
                existing_len,
                ptrs.as_ptr(),
                lens.as_ptr(),
                operands.len() as c_int,
                &mut success,
                &mut len,
            )
        };
        merge_result(out, success, len)
    }

    fn partial_merge(&self, key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        let f = self.partial_merge?;
        let mut success: c_uchar = 0;
        let mut len: size_t = 0;
        let out = unsafe {
            f(
                self.foreign.state,
                slice_ptr(key),
                key.len(),
                slice_ptr(left),
                left.len(),
                slice_ptr(right),
                right.len(),
                &mut success,
                &mut len,
            )
        };
        merge_result(out, success, len)
    }

    fn partial_merge_multi(&self, key: &[u8], operands: &[&[u8]]) -> Option<Vec<u8>> {
        if operands.len() < 2 {
            return None;
        }
        let Some(f) = self.partial_merge_multi else {
            let mut acc = operands[0].to_vec();
            for operand in &operands[1..] {
                acc = self.partial_merge(key, &acc, operand)?;
            }
            return Some(acc);
        };
        let (ptrs, lens) = ptr_arrays(operands);
        let mut success: c_uchar = 0;
        let mut len: size_t = 0;
        let out = unsafe {
            f(
                self.foreign.state,
                slice_ptr(key),
                key.len(),
                ptrs.as_ptr(),
                lens.as_ptr(),
                operands.len() as c_int,
                &mut success,
                &mut len,
            )
        };
        merge_result(out, success, len)
    }
}

pub struct rb_mergeoperator_t {
    pub(crate) inner: Arc<dyn MergeOperator>,
}

/// # Safety
/// See [`rb_comparator_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_mergeoperator_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    full_merge: Option<FullMergeFn>,
    partial_merge: Option<PartialMergeFn>,
    partial_merge_multi: Option<PartialMergeMultiFn>,
    name: Option<NameFn>,
) -> *mut rb_mergeoperator_t {
    let Some(full_merge) = full_merge else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    Box::into_raw(Box::new(rb_mergeoperator_t {
        inner: Arc::new(ForeignMergeOperator {
            foreign,
            name,
            full_merge,
            partial_merge,
            partial_merge_multi,
        }),
    }))
}

/// # Safety
/// `op` must come from [`rb_mergeoperator_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_mergeoperator_destroy(op: *mut rb_mergeoperator_t) {
    if !op.is_null() {
        drop(Box::from_raw(op));
    }
}

// ---------------------------------------------------------------------------
// Slice transform
// ---------------------------------------------------------------------------

struct ForeignSliceTransform {
    foreign: Foreign,
    name: String,
    transform: TransformFn,
    in_domain: KeyPredicateFn,
    in_range: Option<KeyPredicateFn>,
    same_result_when_appended: Option<KeyPredicateFn>,
}

impl SliceTransform for ForeignSliceTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let mut offset: size_t = 0;
        let mut len: size_t = key.len();
        unsafe {
            (self.transform)(self.foreign.state, slice_ptr(key), key.len(), &mut offset, &mut len)
        };
        match offset.checked_add(len) {
            Some(end) if end <= key.len() => &key[offset..end],
            _ => {
                tracing::error!(
                    transform = %self.name,
                    offset,
                    len,
                    key_len = key.len(),
                    "slice transform returned a range outside the key"
                );
                key
            }
        }
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        unsafe { (self.in_domain)(self.foreign.state, slice_ptr(key), key.len()) != 0 }
    }

    fn in_range(&self, prefix: &[u8]) -> bool {
        match self.in_range {
            Some(f) => unsafe { f(self.foreign.state, slice_ptr(prefix), prefix.len()) != 0 },
            None => false,
        }
    }

    fn same_result_when_appended(&self, prefix: &[u8]) -> bool {
        match self.same_result_when_appended {
            Some(f) => unsafe { f(self.foreign.state, slice_ptr(prefix), prefix.len()) != 0 },
            None => false,
        }
    }
}

pub struct rb_slicetransform_t {
    pub(crate) inner: Arc<dyn SliceTransform>,
}

/// # Safety
/// See [`rb_comparator_create`].
#[no_mangle]
pub unsafe extern "C" fn rb_slicetransform_create(
    state: *mut c_void,
    destructor: Option<DestructorFn>,
    transform: Option<TransformFn>,
    in_domain: Option<KeyPredicateFn>,
    in_range: Option<KeyPredicateFn>,
    same_result_when_appended: Option<KeyPredicateFn>,
    name: Option<NameFn>,
) -> *mut rb_slicetransform_t {
    let (Some(transform), Some(in_domain)) = (transform, in_domain) else {
        return ptr::null_mut();
    };
    let foreign = Foreign::new(state, destructor);
    let name = foreign.name(name);
    Box::into_raw(Box::new(rb_slicetransform_t {
        inner: Arc::new(ForeignSliceTransform {
            foreign,
            name,
            transform,
            in_domain,
            in_range,
            same_result_when_appended,
        }),
    }))
}

/// Builtin transform keeping the first `prefix_len` bytes. Owned by the caller.
#[no_mangle]
pub extern "C" fn rb_slicetransform_create_fixed_prefix(
    prefix_len: size_t,
) -> *mut rb_slicetransform_t {
    Box::into_raw(Box::new(rb_slicetransform_t {
        inner: Arc::new(FixedPrefixTransform::new(prefix_len)),
    }))
}

/// The builtin identity transform. Static; never destroy it.
#[no_mangle]
pub extern "C" fn rb_slicetransform_noop() -> *const rb_slicetransform_t {
    static NOOP: OnceLock<rb_slicetransform_t> = OnceLock::new();
    NOOP.get_or_init(|| rb_slicetransform_t {
        inner: Arc::new(NoopTransform),
    })
}

/// # Safety
/// `transform` must be an owned transform from this module.
#[no_mangle]
pub unsafe extern "C" fn rb_slicetransform_destroy(transform: *mut rb_slicetransform_t) {
    if !transform.is_null() {
        drop(Box::from_raw(transform));
    }
}

/// Name of a slice transform as a `malloc`'d string.
///
/// # Safety
/// `transform` must be a live transform.
#[no_mangle]
pub unsafe extern "C" fn rb_slicetransform_name(
    transform: *const rb_slicetransform_t,
) -> *mut c_char {
    match transform.as_ref() {
        Some(t) => malloc_cstring(t.inner.name()),
        None => ptr::null_mut(),
    }
}

/// Apply the transform to `key`, writing the prefix location. Returns false
/// when `key` is outside the transform's domain.
///
/// # Safety
/// `transform` must be live; `key` must be valid for `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rb_slicetransform_transform(
    transform: *const rb_slicetransform_t,
    key: *const c_char,
    key_len: size_t,
    prefix_offset: *mut size_t,
    prefix_len: *mut size_t,
) -> c_uchar {
    let Some(t) = transform.as_ref() else {
        return 0;
    };
    let key = bytes(key, key_len);
    if !t.inner.in_domain(key) {
        return 0;
    }
    let prefix = t.inner.transform(key);
    let offset = prefix.as_ptr() as usize - key.as_ptr() as usize;
    if !prefix_offset.is_null() {
        *prefix_offset = offset;
    }
    if !prefix_len.is_null() {
        *prefix_len = prefix.len();
    }
    1
}
