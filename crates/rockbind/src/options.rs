//! Option objects forwarded to the engine.
//!
//! Each type owns a native options object, released only on drop, so its
//! pointer stays valid for as long as the options are borrowed. Setters
//! write straight through to it; callback objects installed here are shared
//! with the engine, which keeps them alive for every database and column
//! family opened with these options. Installing a closed wrapper or a
//! released snapshot is an invalid argument rather than a reset to the
//! engine default.

use crate::callbacks::{
    NativeComparator, NativeCompactionFilter, NativeCompactionFilterFactory,
    NativeCompactionFilterFactoryV2, NativeFilterPolicy, NativeMergeOperator,
    NativeSliceTransform,
};
use crate::handle::{Handle, NativeResource};
use crate::marshal::opt_c;
use crate::snapshot::Snapshot;
use rockbind_core::Result;
use rockbind_native as ffi;

impl NativeResource for ffi::rb_options_t {
    const KIND: &'static str = "options";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_options_destroy(raw)
    }
}

impl NativeResource for ffi::rb_readoptions_t {
    const KIND: &'static str = "read_options";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_readoptions_destroy(raw)
    }
}

impl NativeResource for ffi::rb_writeoptions_t {
    const KIND: &'static str = "write_options";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_writeoptions_destroy(raw)
    }
}

impl NativeResource for ffi::rb_flushoptions_t {
    const KIND: &'static str = "flush_options";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_flushoptions_destroy(raw)
    }
}

/// Database and column family options.
///
/// Defaults: no database is created, a 4 MiB write buffer, 16 entries per
/// table block and the byte-wise comparator.
#[derive(Debug)]
pub struct Options {
    handle: Handle<ffi::rb_options_t>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    pub fn new() -> Self {
        Self {
            handle: Handle::owned(ffi::rb_options_create()),
        }
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::rb_options_t {
        self.handle.get().as_ptr()
    }

    fn ptr(&mut self) -> *mut ffi::rb_options_t {
        self.handle.get().as_ptr()
    }

    pub fn set_create_if_missing(&mut self, v: bool) {
        unsafe { ffi::rb_options_set_create_if_missing(self.ptr(), v as u8) }
    }

    pub fn set_create_missing_column_families(&mut self, v: bool) {
        unsafe { ffi::rb_options_set_create_missing_column_families(self.ptr(), v as u8) }
    }

    pub fn set_error_if_exists(&mut self, v: bool) {
        unsafe { ffi::rb_options_set_error_if_exists(self.ptr(), v as u8) }
    }

    /// Memtable size in bytes that triggers a flush.
    pub fn set_write_buffer_size(&mut self, size: usize) {
        unsafe { ffi::rb_options_set_write_buffer_size(self.ptr(), size) }
    }

    pub fn set_block_entries(&mut self, entries: usize) {
        unsafe { ffi::rb_options_set_block_entries(self.ptr(), entries) }
    }

    /// Errors if the wrapper was already closed, like every setter taking a
    /// callback object.
    pub fn set_comparator(&mut self, cmp: &NativeComparator) -> Result<()> {
        let cmp = cmp.raw()?;
        unsafe { ffi::rb_options_set_comparator(self.ptr(), cmp.as_ptr()) };
        Ok(())
    }

    pub fn set_merge_operator(&mut self, op: &NativeMergeOperator) -> Result<()> {
        let op = op.raw()?;
        unsafe { ffi::rb_options_set_merge_operator(self.ptr(), op.as_ptr()) };
        Ok(())
    }

    pub fn set_compaction_filter(&mut self, filter: &NativeCompactionFilter) -> Result<()> {
        let filter = filter.raw()?;
        unsafe { ffi::rb_options_set_compaction_filter(self.ptr(), filter.as_ptr()) };
        Ok(())
    }

    pub fn set_compaction_filter_factory(
        &mut self,
        factory: &NativeCompactionFilterFactory,
    ) -> Result<()> {
        let factory = factory.raw()?;
        unsafe { ffi::rb_options_set_compaction_filter_factory(self.ptr(), factory.as_ptr()) };
        Ok(())
    }

    pub fn set_compaction_filter_factory_v2(
        &mut self,
        factory: &NativeCompactionFilterFactoryV2,
    ) -> Result<()> {
        let factory = factory.raw()?;
        unsafe { ffi::rb_options_set_compaction_filter_factory_v2(self.ptr(), factory.as_ptr()) };
        Ok(())
    }

    pub fn set_prefix_extractor(&mut self, transform: &NativeSliceTransform) -> Result<()> {
        let transform = transform.raw()?;
        unsafe { ffi::rb_options_set_prefix_extractor(self.ptr(), transform.as_ptr()) };
        Ok(())
    }

    pub fn set_filter_policy(&mut self, policy: &NativeFilterPolicy) -> Result<()> {
        let policy = policy.raw()?;
        unsafe { ffi::rb_options_set_filter_policy(self.ptr(), policy.as_ptr()) };
        Ok(())
    }
}

#[derive(Debug)]
pub struct ReadOptions {
    handle: Handle<ffi::rb_readoptions_t>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self {
            handle: Handle::owned(ffi::rb_readoptions_create()),
        }
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::rb_readoptions_t {
        self.handle.get().as_ptr()
    }

    /// Read as of `snapshot`. The options keep the snapshot pinned, so the
    /// versions it sees survive compaction even after the [`Snapshot`] is
    /// released, until another snapshot is set or the options are dropped.
    pub fn set_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let (options, snapshot) = (self.handle.get(), snapshot.raw()?);
        unsafe { ffi::rb_readoptions_set_snapshot(options.as_ptr(), snapshot.as_ptr()) };
        Ok(())
    }

    /// Iteration stops before the first key `>=` `key`; `None` clears it.
    pub fn set_iterate_upper_bound(&mut self, key: Option<&[u8]>) {
        let (ptr, len) = opt_c(key);
        unsafe { ffi::rb_readoptions_set_iterate_upper_bound(self.handle.get().as_ptr(), ptr, len) }
    }

    pub fn set_prefix_same_as_start(&mut self, v: bool) {
        unsafe { ffi::rb_readoptions_set_prefix_same_as_start(self.handle.get().as_ptr(), v as u8) }
    }
}

#[derive(Debug)]
pub struct WriteOptions {
    handle: Handle<ffi::rb_writeoptions_t>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self {
            handle: Handle::owned(ffi::rb_writeoptions_create()),
        }
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::rb_writeoptions_t {
        self.handle.get().as_ptr()
    }

    /// fsync the log before a write is acknowledged.
    pub fn set_sync(&mut self, v: bool) {
        unsafe { ffi::rb_writeoptions_set_sync(self.handle.get().as_ptr(), v as u8) }
    }

    pub fn disable_wal(&mut self, v: bool) {
        unsafe { ffi::rb_writeoptions_disable_wal(self.handle.get().as_ptr(), v as u8) }
    }
}

#[derive(Debug)]
pub struct FlushOptions {
    handle: Handle<ffi::rb_flushoptions_t>,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushOptions {
    pub fn new() -> Self {
        Self {
            handle: Handle::owned(ffi::rb_flushoptions_create()),
        }
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::rb_flushoptions_t {
        self.handle.get().as_ptr()
    }

    pub fn set_wait(&mut self, v: bool) {
        unsafe { ffi::rb_flushoptions_set_wait(self.handle.get().as_ptr(), v as u8) }
    }
}
