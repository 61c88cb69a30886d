//! # rockbind-core
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of rockbind.**
//!
//! Users should depend on the main [`rockbind`](https://crates.io/crates/rockbind) crate
//! instead, which re-exports everything needed. This crate's API may change
//! without notice between minor versions.
//!
//! ---
//!
//! Shared types for the engine and the bindings: the error type, native
//! status values, and the capability traits a user implements to customise
//! ordering, filtering, merging, compaction and prefix extraction.

#![warn(clippy::all)]

pub mod comparator;
pub mod compaction;
pub mod error;
pub mod filter;
pub mod merge;
pub mod status;
pub mod transform;

pub use comparator::{BytewiseComparator, Comparator, ReverseBytewiseComparator};
pub use compaction::{
    CompactionFilter, CompactionFilterContext, CompactionFilterFactory,
    CompactionFilterFactoryV2, CompactionFilterV2, Decision,
};
pub use error::{Error, Result};
pub use filter::{BloomFilterPolicy, FilterBitsBuilder, FilterBitsReader, FilterPolicy};
pub use merge::{
    associative_full_merge, associative_partial_merge, AssociativeMergeOperator, MergeOperator,
};
pub use status::{Status, StatusCode};
pub use transform::{FixedPrefixTransform, NoopTransform, SliceTransform};
