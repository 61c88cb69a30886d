use rockbind::{
    AssociativeMergeOperator, CompactionFilter, Decision, NativeCompactionFilter,
    NativeMergeOperator, NativeSliceTransform, Options, ReadOptions, WriteOptions, DB,
};

/// Page view counters stored as decimal strings.
struct Counter;

impl AssociativeMergeOperator for Counter {
    fn name(&self) -> &str {
        "demo.Counter"
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
        let parse = |v: &[u8]| std::str::from_utf8(v).ok()?.parse::<u64>().ok();
        let total = existing.map_or(Some(0), parse)? + parse(value)?;
        Some(total.to_string().into_bytes())
    }
}

/// Drops counters that never got past one view.
struct PruneSingles;

impl CompactionFilter for PruneSingles {
    fn name(&self) -> &str {
        "demo.PruneSingles"
    }

    fn filter(&self, _level: u32, _key: &[u8], value: &[u8]) -> Decision {
        if value == b"1" {
            Decision::Remove
        } else {
            Decision::Keep
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== rockbind Callbacks Demo ===\n");
    let dir = tempfile::tempdir()?;

    let mut opts = Options::new();
    opts.set_create_if_missing(true);
    opts.set_merge_operator(&NativeMergeOperator::associative(Counter))?;
    opts.set_compaction_filter(&NativeCompactionFilter::new(PruneSingles))?;
    opts.set_prefix_extractor(&NativeSliceTransform::fixed_prefix(5))?;

    let db = DB::open(&opts, dir.path())?;
    let write = WriteOptions::new();

    println!("1. Counting page views with merge operands...");
    for page in ["page:home", "page:home", "page:docs", "page:home", "page:blog"] {
        db.merge(&write, page.as_bytes(), b"1")?;
    }
    for (key, value) in db.iterator(&ReadOptions::new())?.entries() {
        println!(
            "   {} = {}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
    }

    println!("\n2. Compacting (merges resolved, singles pruned)...");
    db.compact_range(None, None)?;
    for (key, value) in db.iterator(&ReadOptions::new())?.entries() {
        println!(
            "   {} = {}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
