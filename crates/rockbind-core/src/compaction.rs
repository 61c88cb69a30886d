//! Compaction filters and their factories.

use crate::transform::SliceTransform;
use std::sync::Arc;

/// What a compaction filter wants done with one entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Decision {
    /// Keep the entry unchanged
    #[default]
    Keep,
    /// Drop the entry from the compaction output
    Remove,
    /// Keep the key with a replacement value
    Change(Vec<u8>),
}

impl Decision {
    /// True for [`Decision::Remove`].
    pub fn is_remove(&self) -> bool {
        matches!(self, Decision::Remove)
    }
}

/// Context handed to a factory when a compaction run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionFilterContext {
    /// The run covers every table of the column family
    pub is_full_compaction: bool,
    /// The run was requested through a compact-range call
    pub is_manual_compaction: bool,
}

/// Decides, entry by entry, what survives a compaction.
///
/// Called with the newest visible value of each key. The engine may call
/// one filter from several threads, so implementations must be thread-safe.
pub trait CompactionFilter: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, level: u32, key: &[u8], existing_value: &[u8]) -> Decision;
}

/// Batch variant of [`CompactionFilter`].
///
/// Receives all entries sharing one prefix, as defined by the prefix
/// extractor of the factory that created the filter, and returns one
/// decision per entry.
pub trait CompactionFilterV2: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, level: u32, keys: &[&[u8]], existing_values: &[&[u8]]) -> Vec<Decision>;
}

/// Creates a fresh [`CompactionFilter`] for every compaction run.
pub trait CompactionFilterFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create_compaction_filter(
        &self,
        context: &CompactionFilterContext,
    ) -> Box<dyn CompactionFilter>;
}

/// Creates a fresh [`CompactionFilterV2`] for every compaction run.
///
/// The factory carries its own prefix extractor, independent of the column
/// family's read-path extractor. The engine asks for it once, when the
/// factory is installed.
pub trait CompactionFilterFactoryV2: Send + Sync {
    fn name(&self) -> &str;

    fn create_compaction_filter_v2(
        &self,
        context: &CompactionFilterContext,
    ) -> Box<dyn CompactionFilterV2>;

    /// Groups the entries of a run into batches.
    fn prefix_extractor(&self) -> Arc<dyn SliceTransform>;
}
