//! Database, read, write and flush options.

use crate::callbacks::{
    rb_comparator_t, rb_compactionfilter_t, rb_compactionfilterfactory_t,
    rb_compactionfilterfactoryv2_t, rb_filterpolicy_t, rb_mergeoperator_t, rb_slicetransform_t,
};
use crate::raw::bytes;
use crate::snapshot::{rb_snapshot_t, SnapshotPin};
use libc::{c_char, c_uchar, size_t};
use rockbind_core::{
    BytewiseComparator, Comparator, CompactionFilter, CompactionFilterFactory,
    CompactionFilterFactoryV2, FilterPolicy, MergeOperator, SliceTransform,
};
use std::sync::Arc;

/// Default memtable flush threshold (4MB)
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;
/// Default number of entries per table block
pub const DEFAULT_BLOCK_ENTRIES: usize = 16;

/// Database and column family options.
#[derive(Clone)]
pub struct Options {
    pub create_if_missing: bool,
    pub create_missing_column_families: bool,
    pub error_if_exists: bool,
    /// Memtable size that triggers a flush
    pub write_buffer_size: usize,
    /// Entries per block of an immutable table
    pub block_entries: usize,
    pub comparator: Arc<dyn Comparator>,
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    pub compaction_filter: Option<Arc<dyn CompactionFilter>>,
    pub compaction_filter_factory: Option<Arc<dyn CompactionFilterFactory>>,
    pub compaction_filter_factory_v2: Option<Arc<dyn CompactionFilterFactoryV2>>,
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            create_missing_column_families: false,
            error_if_exists: false,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            block_entries: DEFAULT_BLOCK_ENTRIES,
            comparator: Arc::new(BytewiseComparator),
            merge_operator: None,
            compaction_filter: None,
            compaction_filter_factory: None,
            compaction_filter_factory_v2: None,
            prefix_extractor: None,
            filter_policy: None,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("block_entries", &self.block_entries)
            .field("comparator", &self.comparator.name())
            .field(
                "merge_operator",
                &self.merge_operator.as_ref().map(|m| m.name().to_string()),
            )
            .field(
                "prefix_extractor",
                &self.prefix_extractor.as_ref().map(|p| p.name().to_string()),
            )
            .finish_non_exhaustive()
    }
}

/// Per-read options.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the latest sequence. Holding the
    /// pin keeps the snapshot's versions alive after the snapshot itself is
    /// released.
    pub snapshot: Option<Arc<SnapshotPin>>,
    /// Iteration stops before the first key `>=` this bound
    pub iterate_upper_bound: Option<Vec<u8>>,
    /// After a seek, iteration stops when the prefix changes
    pub prefix_same_as_start: bool,
}

/// Per-write options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the log before acknowledging
    pub sync: bool,
    pub disable_wal: bool,
}

/// Options for an explicit flush.
#[derive(Debug, Clone, Copy)]
pub struct FlushOptions {
    pub wait: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self { wait: true }
    }
}

pub struct rb_options_t {
    pub(crate) inner: Options,
}

pub struct rb_readoptions_t {
    pub(crate) inner: ReadOptions,
}

pub struct rb_writeoptions_t {
    pub(crate) inner: WriteOptions,
}

pub struct rb_flushoptions_t {
    pub(crate) inner: FlushOptions,
}

macro_rules! boxed_lifecycle {
    ($create:ident, $destroy:ident, $ty:ident, $inner:ty) => {
        #[no_mangle]
        pub extern "C" fn $create() -> *mut $ty {
            Box::into_raw(Box::new($ty {
                inner: <$inner>::default(),
            }))
        }

        /// # Safety
        /// The pointer must come from the matching create function.
        #[no_mangle]
        pub unsafe extern "C" fn $destroy(ptr: *mut $ty) {
            if !ptr.is_null() {
                drop(Box::from_raw(ptr));
            }
        }
    };
}

boxed_lifecycle!(rb_options_create, rb_options_destroy, rb_options_t, Options);
boxed_lifecycle!(
    rb_readoptions_create,
    rb_readoptions_destroy,
    rb_readoptions_t,
    ReadOptions
);
boxed_lifecycle!(
    rb_writeoptions_create,
    rb_writeoptions_destroy,
    rb_writeoptions_t,
    WriteOptions
);
boxed_lifecycle!(
    rb_flushoptions_create,
    rb_flushoptions_destroy,
    rb_flushoptions_t,
    FlushOptions
);

/// # Safety
/// `opt` must be a live options object.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_create_if_missing(opt: *mut rb_options_t, v: c_uchar) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.create_if_missing = v != 0;
    }
}

/// # Safety
/// `opt` must be a live options object.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_create_missing_column_families(
    opt: *mut rb_options_t,
    v: c_uchar,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.create_missing_column_families = v != 0;
    }
}

/// # Safety
/// `opt` must be a live options object.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_error_if_exists(opt: *mut rb_options_t, v: c_uchar) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.error_if_exists = v != 0;
    }
}

/// # Safety
/// `opt` must be a live options object.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_write_buffer_size(opt: *mut rb_options_t, v: size_t) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.write_buffer_size = v;
    }
}

/// # Safety
/// `opt` must be a live options object.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_block_entries(opt: *mut rb_options_t, v: size_t) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.block_entries = v.max(1);
    }
}

/// Install a comparator. The options keep their own reference, so `cmp` may
/// be destroyed afterwards. Null restores the byte-wise default.
///
/// # Safety
/// `opt` must be live; `cmp` must be null or a live comparator.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_comparator(
    opt: *mut rb_options_t,
    cmp: *const rb_comparator_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.comparator = match cmp.as_ref() {
            Some(c) => Arc::clone(&c.inner),
            None => Arc::new(BytewiseComparator),
        };
    }
}

/// # Safety
/// `opt` must be live; `op` must be null or a live merge operator.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_merge_operator(
    opt: *mut rb_options_t,
    op: *const rb_mergeoperator_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.merge_operator = op.as_ref().map(|o| Arc::clone(&o.inner));
    }
}

/// # Safety
/// `opt` must be live; `filter` must be null or a live compaction filter.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_compaction_filter(
    opt: *mut rb_options_t,
    filter: *const rb_compactionfilter_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.compaction_filter = filter.as_ref().map(|f| Arc::clone(&f.inner));
    }
}

/// # Safety
/// `opt` must be live; `factory` must be null or a live factory.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_compaction_filter_factory(
    opt: *mut rb_options_t,
    factory: *const rb_compactionfilterfactory_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.compaction_filter_factory = factory.as_ref().map(|f| Arc::clone(&f.inner));
    }
}

/// # Safety
/// `opt` must be live; `factory` must be null or a live factory.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_compaction_filter_factory_v2(
    opt: *mut rb_options_t,
    factory: *const rb_compactionfilterfactoryv2_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.compaction_filter_factory_v2 = factory.as_ref().map(|f| Arc::clone(&f.inner));
    }
}

/// # Safety
/// `opt` must be live; `transform` must be null or a live transform.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_prefix_extractor(
    opt: *mut rb_options_t,
    transform: *const rb_slicetransform_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.prefix_extractor = transform.as_ref().map(|t| Arc::clone(&t.inner));
    }
}

/// # Safety
/// `opt` must be live; `policy` must be null or a live filter policy.
#[no_mangle]
pub unsafe extern "C" fn rb_options_set_filter_policy(
    opt: *mut rb_options_t,
    policy: *const rb_filterpolicy_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.filter_policy = policy.as_ref().map(|p| Arc::clone(&p.inner));
    }
}

/// Read as of `snapshot`, or the latest state for null. The options share
/// the snapshot's pin, so its versions stay readable until both the
/// snapshot and the options are destroyed.
///
/// # Safety
/// `opt` must be live; `snapshot` must be null or a live snapshot.
#[no_mangle]
pub unsafe extern "C" fn rb_readoptions_set_snapshot(
    opt: *mut rb_readoptions_t,
    snapshot: *const rb_snapshot_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.snapshot = snapshot.as_ref().map(rb_snapshot_t::pin);
    }
}

/// Set or clear (null key) the iteration upper bound. The key is copied.
///
/// # Safety
/// `opt` must be live; `key` must be null or valid for `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rb_readoptions_set_iterate_upper_bound(
    opt: *mut rb_readoptions_t,
    key: *const c_char,
    key_len: size_t,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.iterate_upper_bound = (!key.is_null()).then(|| bytes(key, key_len).to_vec());
    }
}

/// # Safety
/// `opt` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_readoptions_set_prefix_same_as_start(
    opt: *mut rb_readoptions_t,
    v: c_uchar,
) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.prefix_same_as_start = v != 0;
    }
}

/// # Safety
/// `opt` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_writeoptions_set_sync(opt: *mut rb_writeoptions_t, v: c_uchar) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.sync = v != 0;
    }
}

/// # Safety
/// `opt` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_writeoptions_disable_wal(opt: *mut rb_writeoptions_t, v: c_uchar) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.disable_wal = v != 0;
    }
}

/// # Safety
/// `opt` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_flushoptions_set_wait(opt: *mut rb_flushoptions_t, v: c_uchar) {
    if let Some(opt) = opt.as_mut() {
        opt.inner.wait = v != 0;
    }
}
