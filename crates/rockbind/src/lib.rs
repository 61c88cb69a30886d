//! # rockbind
//!
//! Safe Rust bindings over an embedded key-value engine that exposes a C
//! calling convention, with user-defined callbacks for key ordering,
//! filters, merging, compaction and prefix extraction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rockbind::{AssociativeMergeOperator, NativeMergeOperator, Options, ReadOptions, WriteOptions, DB};
//!
//! struct Add;
//!
//! impl AssociativeMergeOperator for Add {
//!     fn name(&self) -> &str {
//!         "example.Add"
//!     }
//!
//!     fn merge(&self, _key: &[u8], existing: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
//!         let parse = |v: &[u8]| std::str::from_utf8(v).ok()?.parse::<u64>().ok();
//!         let sum = existing.map_or(Some(0), parse)? + parse(value)?;
//!         Some(sum.to_string().into_bytes())
//!     }
//! }
//!
//! fn main() -> rockbind::Result<()> {
//!     let mut opts = Options::new();
//!     opts.set_create_if_missing(true);
//!     opts.set_merge_operator(&NativeMergeOperator::associative(Add))?;
//!
//!     let db = DB::open(&opts, "./counters")?;
//!     let write = WriteOptions::new();
//!     db.merge(&write, b"hits", b"1")?;
//!     db.merge(&write, b"hits", b"2")?;
//!     assert_eq!(db.get(&ReadOptions::new(), b"hits")?, Some(b"3".to_vec()));
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! - [`Handle`]: owns or borrows one native object and releases it at most
//!   once, explicitly or on drop. Calls hold a [`HandleGuard`], so a release
//!   waits for them and later calls fail with an invalid argument.
//! - [`Registry`]: maps the opaque tokens handed to the engine back to the
//!   user objects they stand for.
//! - Upcall shims: `extern "C"` functions the engine calls. They resolve the
//!   token, run the user callback and translate the result, and never let a
//!   panic or an unknown token cross back into native code.
//!
//! Children ([`Snapshot`], [`DbIterator`], [`ColumnFamilyHandle`]) keep the
//! database state alive, so dropping a database before its children is
//! safe. Releasing a child through a database it did not come from panics.

#![warn(clippy::all)]

pub mod callbacks;
pub mod column_family;
pub mod db;
pub mod handle;
pub mod iterator;
pub mod logging;
pub(crate) mod marshal;
pub mod options;
pub mod registry;
pub(crate) mod shim;
pub mod snapshot;
pub mod transaction_log;
pub mod write_batch;

pub use rockbind_core::{
    AssociativeMergeOperator, BytewiseComparator, Comparator, CompactionFilter,
    CompactionFilterContext, CompactionFilterFactory, CompactionFilterFactoryV2,
    CompactionFilterV2, Decision, Error, FilterBitsBuilder, FilterBitsReader, FilterPolicy,
    FixedPrefixTransform, MergeOperator, NoopTransform, Result, ReverseBytewiseComparator,
    SliceTransform, Status, StatusCode,
};

pub use callbacks::{
    NativeCompactionFilter, NativeCompactionFilterFactory, NativeCompactionFilterFactoryV2,
    NativeCompactionFilterV2, NativeComparator, NativeFilterPolicy, NativeMergeOperator,
    NativeSliceTransform,
};
pub use column_family::ColumnFamilyHandle;
pub use db::DB;
pub use handle::{Handle, HandleGuard, NativeResource};
pub use iterator::DbIterator;
pub use options::{FlushOptions, Options, ReadOptions, WriteOptions};
pub use registry::{Callback, Registry, Token};
pub use snapshot::Snapshot;
pub use transaction_log::TransactionLogIterator;
pub use write_batch::WriteBatch;

/// Names accepted by [`DB::property_value`].
pub use rockbind_native::properties;
pub use rockbind_native::DEFAULT_COLUMN_FAMILY_NAME;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
