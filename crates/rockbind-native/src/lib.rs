//! # rockbind native engine
//!
//! Embedded key-value engine with a C calling convention.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of rockbind.**
//!
//! Users should depend on the main [`rockbind`](https://crates.io/crates/rockbind) crate
//! instead, which provides the safe API. Everything here is reached through
//! `extern "C"` functions, opaque `rb_*_t` pointers and `repr(C)` structs, the
//! same shape as the RocksDB C API.
//!
//! ```toml
//! # In your Cargo.toml - use the main crate, not this one:
//! [dependencies]
//! rockbind = "0.3"
//! ```
//!
//! ---
//!
//! ## Architecture
//!
//! ```text
//! rb_put / rb_write ─▶ LOG.wal ─▶ Memtable ──flush──▶ Table (block index + filter)
//!                                                        │
//! rb_compact_range ◀────────── compaction filters ◀──────┘
//! ```
//!
//! - **Memtable**: sorted by the column family comparator, one version per write
//! - **Table**: immutable blocks bounded by separator/successor keys, with a
//!   filter from the filter policy
//! - **Compaction**: merges tables, folds merge operands, runs compaction filters
//! - **Log**: framed, checksummed records replayed on open
//! - **Manifest**: column families and their comparator names
//! - **Transaction log iterator**: logged batches replayed from a sequence
//!   number, for tailing a database
//!
//! User callbacks arrive as C function pointers plus an opaque `state`
//! pointer. Each callback object is reference counted and calls its
//! `destructor` once, after its last use.

#![warn(clippy::all)]
#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]

pub mod api;
pub mod callbacks;
pub mod compaction;
pub mod db;
pub mod iterator;
pub mod log;
pub mod manifest;
pub mod memtable;
pub mod merge;
pub mod options;
pub mod raw;
pub mod snapshot;
pub mod table;
pub mod transaction_log;
pub mod write_batch;

pub use api::*;
pub use callbacks::*;
pub use iterator::*;
pub use options::*;
pub use raw::{decode_status, rb_status_t};
pub use snapshot::{rb_snapshot_get_sequence_number, rb_snapshot_t};
pub use transaction_log::*;
pub use write_batch::*;

pub use db::{properties, ColumnFamily, Db};
pub use manifest::DEFAULT_COLUMN_FAMILY_NAME;
