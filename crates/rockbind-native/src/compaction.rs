//! Compaction - Merging tables and running compaction filters
//!
//! A compaction merges every table of a column family into one. When no
//! snapshot pins older versions, each key is resolved to its current value
//! (tombstones dropped, merge operands folded) and handed to the column
//! family's compaction filter, which may keep, remove or change it.
//!
//! Filter selection, first match wins:
//!
//! 1. `compaction_filter`, shared by every run
//! 2. `compaction_filter_factory`, one filter created per run
//! 3. `compaction_filter_factory_v2`, one filter per run, called on batches of
//!    consecutive keys that share a prefix under the factory's own extractor

use crate::memtable::{MemtableEntry, Version};
use crate::merge::{group_by_key, resolve};
use crate::options::Options;
use rockbind_core::{
    CompactionFilter, CompactionFilterContext, CompactionFilterV2, Comparator, Decision,
    SliceTransform,
};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Level reported to compaction filters; there is a single level.
pub const COMPACTION_LEVEL: u32 = 0;

/// Statistics for one compaction run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Versions read from the input tables
    pub input_versions: usize,
    /// Versions written to the output table
    pub output_versions: usize,
    /// Keys dropped (tombstones or filter removals)
    pub entries_removed: usize,
    /// Values replaced by a filter
    pub entries_changed: usize,
}

/// Key range and kind of a compaction run
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionRequest<'a> {
    pub start: Option<&'a [u8]>,
    pub limit: Option<&'a [u8]>,
    pub manual: bool,
}

impl CompactionRequest<'_> {
    fn is_full(&self) -> bool {
        self.start.is_none() && self.limit.is_none()
    }

    /// `start <= key < limit`; absent bounds are open.
    fn contains(&self, cmp: &dyn Comparator, key: &[u8]) -> bool {
        let after_start = self
            .start
            .map_or(true, |s| cmp.compare(key, s) != Ordering::Less);
        let before_limit = self
            .limit
            .map_or(true, |l| cmp.compare(key, l) == Ordering::Less);
        after_start && before_limit
    }

    fn context(&self) -> CompactionFilterContext {
        CompactionFilterContext {
            is_full_compaction: self.is_full(),
            is_manual_compaction: self.manual,
        }
    }
}

/// Entry for the merge heap
struct MergeEntry<'a> {
    version: &'a Version,
    source_idx: usize,
    pos: usize,
    comparator: &'a dyn Comparator,
}

impl PartialEq for MergeEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry<'_> {}

impl PartialOrd for MergeEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so key comparison is reversed for min-heap
        // behavior. For equal keys the higher sequence (newer write) pops first.
        match self.comparator.compare(&other.version.key, &self.version.key) {
            Ordering::Equal => self.version.sequence.cmp(&other.version.sequence),
            ord => ord,
        }
    }
}

/// K-way merge of sorted version runs into one run in internal order.
pub(crate) fn merge_sources<'a>(
    cmp: &'a dyn Comparator,
    sources: &[&'a [Version]],
) -> Vec<&'a Version> {
    let mut heap = BinaryHeap::with_capacity(sources.len());
    for (source_idx, source) in sources.iter().enumerate() {
        if let Some(version) = source.first() {
            heap.push(MergeEntry {
                version,
                source_idx,
                pos: 0,
                comparator: cmp,
            });
        }
    }

    let mut merged = Vec::with_capacity(sources.iter().map(|s| s.len()).sum());
    while let Some(entry) = heap.pop() {
        merged.push(entry.version);
        let next = entry.pos + 1;
        if let Some(version) = sources[entry.source_idx].get(next) {
            heap.push(MergeEntry {
                version,
                source_idx: entry.source_idx,
                pos: next,
                comparator: cmp,
            });
        }
    }
    merged
}

/// Output slot for one key
enum Slot {
    /// Resolved to a live value, subject to the compaction filter
    Resolved {
        key: Vec<u8>,
        sequence: u64,
        value: Vec<u8>,
    },
    /// Carried over untouched
    Kept(Vec<Version>),
}

/// Compact `inputs` (tables, newest first) into the versions of one table.
///
/// With `keep_history` set (a snapshot is alive) every version is kept and
/// no filter runs, so reads at any pinned sequence stay correct.
pub(crate) fn compact(
    options: &Options,
    inputs: &[&[Version]],
    request: CompactionRequest<'_>,
    keep_history: bool,
) -> (Vec<Version>, CompactionStats) {
    let cmp = options.comparator.as_ref();
    let merged: Vec<Version> = merge_sources(cmp, inputs).into_iter().cloned().collect();
    let mut stats = CompactionStats {
        input_versions: merged.len(),
        ..Default::default()
    };

    if keep_history {
        tracing::debug!(versions = merged.len(), "snapshots alive, keeping every version");
        stats.output_versions = merged.len();
        return (merged, stats);
    }

    let merge_operator = options.merge_operator.as_deref();
    let mut slots = Vec::new();
    for group in group_by_key(cmp, merged) {
        let key = group[0].key.clone();
        if !request.contains(cmp, &key) {
            slots.push(Slot::Kept(group));
            continue;
        }
        match resolve(&key, &group, merge_operator) {
            Ok(Some(value)) => slots.push(Slot::Resolved {
                sequence: group[0].sequence,
                key,
                value,
            }),
            Ok(None) => stats.entries_removed += 1,
            Err(e) => {
                tracing::error!(error = %e, "merge failed during compaction, keeping operands");
                slots.push(Slot::Kept(group));
            }
        }
    }

    let decisions = run_filter(options, &slots, request);

    let mut output = Vec::new();
    for (slot, decision) in slots.into_iter().zip(decisions) {
        match slot {
            Slot::Kept(versions) => output.extend(versions),
            Slot::Resolved {
                key,
                sequence,
                value,
            } => match decision {
                Decision::Keep => {
                    output.push(Version::new(key, sequence, MemtableEntry::Value(value)))
                }
                Decision::Remove => stats.entries_removed += 1,
                Decision::Change(new_value) => {
                    stats.entries_changed += 1;
                    output.push(Version::new(key, sequence, MemtableEntry::Value(new_value)));
                }
            },
        }
    }

    stats.output_versions = output.len();
    (output, stats)
}

/// One decision per slot; `Keep` for carried-over slots.
fn run_filter(options: &Options, slots: &[Slot], request: CompactionRequest<'_>) -> Vec<Decision> {
    let mut decisions = vec![Decision::Keep; slots.len()];
    let resolved: Vec<(usize, &[u8], &[u8])> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| match slot {
            Slot::Resolved { key, value, .. } => Some((i, key.as_slice(), value.as_slice())),
            Slot::Kept(_) => None,
        })
        .collect();
    if resolved.is_empty() {
        return decisions;
    }

    if let Some(filter) = &options.compaction_filter {
        apply_single(filter.as_ref(), &resolved, &mut decisions);
    } else if let Some(factory) = &options.compaction_filter_factory {
        let filter = factory.create_compaction_filter(&request.context());
        tracing::debug!(
            factory = factory.name(),
            filter = filter.name(),
            "created compaction filter"
        );
        apply_single(filter.as_ref(), &resolved, &mut decisions);
    } else if let Some(factory) = &options.compaction_filter_factory_v2 {
        let filter = factory.create_compaction_filter_v2(&request.context());
        tracing::debug!(
            factory = factory.name(),
            filter = filter.name(),
            "created compaction filter v2"
        );
        let extractor = factory.prefix_extractor();
        apply_batched(extractor.as_ref(), filter.as_ref(), &resolved, &mut decisions);
    }
    decisions
}

fn apply_single(
    filter: &dyn CompactionFilter,
    resolved: &[(usize, &[u8], &[u8])],
    decisions: &mut [Decision],
) {
    for &(i, key, value) in resolved {
        decisions[i] = filter.filter(COMPACTION_LEVEL, key, value);
    }
}

/// Batches are runs of consecutive keys with the same prefix. Keys outside
/// the extractor's domain form a batch of their own.
fn apply_batched(
    extractor: &dyn SliceTransform,
    filter: &dyn CompactionFilterV2,
    resolved: &[(usize, &[u8], &[u8])],
    decisions: &mut [Decision],
) {
    let prefix_of = |key: &[u8]| -> Option<Vec<u8>> {
        extractor.in_domain(key).then(|| extractor.transform(key).to_vec())
    };

    let mut start = 0;
    while start < resolved.len() {
        let prefix = prefix_of(resolved[start].1);
        let mut end = start + 1;
        if prefix.is_some() {
            while end < resolved.len() && prefix_of(resolved[end].1) == prefix {
                end += 1;
            }
        }

        let batch = &resolved[start..end];
        let keys: Vec<&[u8]> = batch.iter().map(|&(_, k, _)| k).collect();
        let values: Vec<&[u8]> = batch.iter().map(|&(_, _, v)| v).collect();
        let batch_decisions = filter.filter(COMPACTION_LEVEL, &keys, &values);
        if batch_decisions.len() == batch.len() {
            for (&(i, _, _), decision) in batch.iter().zip(batch_decisions) {
                decisions[i] = decision;
            }
        } else {
            tracing::error!(
                filter = filter.name(),
                expected = batch.len(),
                got = batch_decisions.len(),
                "compaction filter v2 returned wrong number of decisions, keeping batch"
            );
        }
        start = end;
    }
}
