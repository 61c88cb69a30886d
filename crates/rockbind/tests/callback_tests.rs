// End-to-end tests: user callbacks driven by the engine through the shims

mod common;

use common::{get, keys, put_all, DbFixture};
use rockbind::{
    AssociativeMergeOperator, CompactionFilter, CompactionFilterContext, CompactionFilterFactory,
    CompactionFilterFactoryV2, CompactionFilterV2, Comparator, Decision, FilterBitsBuilder,
    FilterBitsReader, FilterPolicy, FlushOptions, MergeOperator, NativeCompactionFilter,
    NativeCompactionFilterFactory, NativeCompactionFilterFactoryV2, NativeComparator,
    NativeFilterPolicy, NativeMergeOperator, NativeSliceTransform, ReadOptions, Registry,
    SliceTransform, Token, WriteOptions,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

/// Shorter keys first, then byte-wise.
struct LengthFirst;

impl Comparator for LengthFirst {
    fn name(&self) -> &str {
        "test.LengthFirst"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

struct Add;

impl AssociativeMergeOperator for Add {
    fn name(&self) -> &str {
        "test.Add"
    }

    fn merge(&self, _key: &[u8], existing: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
        let parse = |v: &[u8]| std::str::from_utf8(v).ok()?.parse::<i64>().ok();
        let sum = existing.map_or(Some(0), parse)? + parse(value)?;
        Some(sum.to_string().into_bytes())
    }
}

/// Counts full merges so a test can tell reads from compactions.
struct CountingAppend {
    full_merges: Arc<AtomicUsize>,
}

impl MergeOperator for CountingAppend {
    fn name(&self) -> &str {
        "test.CountingAppend"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        self.full_merges.fetch_add(1, AtomicOrdering::SeqCst);
        let mut parts: Vec<&[u8]> = existing.into_iter().collect();
        parts.extend_from_slice(operands);
        Some(parts.join(&b","[..]))
    }
}

struct Panicking;

impl MergeOperator for Panicking {
    fn name(&self) -> &str {
        "test.Panicking"
    }

    fn full_merge(
        &self,
        _key: &[u8],
        _existing: Option<&[u8]>,
        _operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        panic!("merge operator exploded");
    }
}

/// Removes `tmp:` keys and upper-cases `up:` values.
struct Housekeeping;

impl CompactionFilter for Housekeeping {
    fn name(&self) -> &str {
        "test.Housekeeping"
    }

    fn filter(&self, _level: u32, key: &[u8], value: &[u8]) -> Decision {
        if key.starts_with(b"tmp:") {
            Decision::Remove
        } else if key.starts_with(b"up:") {
            Decision::Change(value.to_ascii_uppercase())
        } else {
            Decision::Keep
        }
    }
}

#[derive(Default)]
struct RunCounters {
    created: AtomicUsize,
    filtered: AtomicUsize,
    dropped: AtomicUsize,
    manual: AtomicUsize,
}

struct PerRunFilter {
    counters: Arc<RunCounters>,
}

impl CompactionFilter for PerRunFilter {
    fn name(&self) -> &str {
        "test.PerRun"
    }

    fn filter(&self, _level: u32, key: &[u8], _value: &[u8]) -> Decision {
        self.counters.filtered.fetch_add(1, AtomicOrdering::SeqCst);
        if key == b"expired" {
            Decision::Remove
        } else {
            Decision::Keep
        }
    }
}

impl Drop for PerRunFilter {
    fn drop(&mut self) {
        self.counters.dropped.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

struct PerRunFactory {
    counters: Arc<RunCounters>,
}

impl CompactionFilterFactory for PerRunFactory {
    fn name(&self) -> &str {
        "test.PerRunFactory"
    }

    fn create_compaction_filter(
        &self,
        context: &CompactionFilterContext,
    ) -> Box<dyn CompactionFilter> {
        self.counters.created.fetch_add(1, AtomicOrdering::SeqCst);
        if context.is_manual_compaction {
            self.counters.manual.fetch_add(1, AtomicOrdering::SeqCst);
        }
        Box::new(PerRunFilter {
            counters: Arc::clone(&self.counters),
        })
    }
}

/// Records batch sizes and drops every batch holding a `"drop"` value.
struct BatchRecorder {
    batches: Arc<Mutex<Vec<usize>>>,
}

impl CompactionFilterV2 for BatchRecorder {
    fn name(&self) -> &str {
        "test.BatchRecorder"
    }

    fn filter(&self, _level: u32, keys: &[&[u8]], values: &[&[u8]]) -> Vec<Decision> {
        self.batches.lock().unwrap().push(keys.len());
        let drop_all = values.iter().any(|v| *v == b"drop");
        keys.iter()
            .map(|_| if drop_all { Decision::Remove } else { Decision::Keep })
            .collect()
    }
}

struct BatchRecorderFactory {
    batches: Arc<Mutex<Vec<usize>>>,
}

impl CompactionFilterFactoryV2 for BatchRecorderFactory {
    fn name(&self) -> &str {
        "test.BatchRecorderFactory"
    }

    fn create_compaction_filter_v2(
        &self,
        _context: &CompactionFilterContext,
    ) -> Box<dyn CompactionFilterV2> {
        Box::new(BatchRecorder {
            batches: Arc::clone(&self.batches),
        })
    }

    fn prefix_extractor(&self) -> Arc<dyn SliceTransform> {
        Arc::new(Namespace)
    }
}

/// The part of a key before the first `':'`.
struct Namespace;

impl SliceTransform for Namespace {
    fn name(&self) -> &str {
        "test.Namespace"
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        let end = key.iter().position(|&b| b == b':').unwrap_or(key.len());
        &key[..end]
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        key.contains(&b':')
    }
}

/// Exact-set filter: the filter is every key joined by `'|'`.
struct ExactSet {
    lookups: Arc<AtomicUsize>,
}

impl FilterPolicy for ExactSet {
    fn name(&self) -> &str {
        "test.ExactSet"
    }

    fn create_filter(&self, keys: &[&[u8]]) -> Vec<u8> {
        keys.join(&b"|"[..])
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.lookups.fetch_add(1, AtomicOrdering::SeqCst);
        filter.split(|&b| b == b'|').any(|k| k == key)
    }
}

/// Full-filter variant of [`ExactSet`].
struct ExactBits {
    lookups: Arc<AtomicUsize>,
}

struct ExactBitsBuilder {
    keys: Vec<Vec<u8>>,
}

impl FilterBitsBuilder for ExactBitsBuilder {
    fn add_key(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.keys).join(&b"|"[..])
    }
}

struct ExactBitsReader {
    keys: HashSet<Vec<u8>>,
    lookups: Arc<AtomicUsize>,
}

impl FilterBitsReader for ExactBitsReader {
    fn may_match(&self, key: &[u8]) -> bool {
        self.lookups.fetch_add(1, AtomicOrdering::SeqCst);
        self.keys.contains(key)
    }
}

impl FilterPolicy for ExactBits {
    fn name(&self) -> &str {
        "test.ExactBits"
    }

    fn create_filter(&self, _keys: &[&[u8]]) -> Vec<u8> {
        unreachable!("the bits builder is preferred")
    }

    fn key_may_match(&self, _key: &[u8], _filter: &[u8]) -> bool {
        true
    }

    fn bits_builder(&self) -> Option<Box<dyn FilterBitsBuilder>> {
        Some(Box::new(ExactBitsBuilder { keys: Vec::new() }))
    }

    fn bits_reader(&self, contents: &[u8]) -> Option<Box<dyn FilterBitsReader>> {
        Some(Box::new(ExactBitsReader {
            keys: contents.split(|&b| b == b'|').map(<[u8]>::to_vec).collect(),
            lookups: Arc::clone(&self.lookups),
        }))
    }
}

fn assert_unregistered(tokens: &[Token]) {
    for token in tokens {
        assert!(!Registry::global().contains(*token), "{} still registered", token);
    }
}

#[test]
fn test_custom_comparator_orders_iteration() {
    let fixture = DbFixture::new();
    let cmp = NativeComparator::new(LengthFirst);
    let token = cmp.token().unwrap();
    let db = fixture.open_with(|opts| opts.set_comparator(&cmp));
    drop(cmp);

    put_all(&db, &[(b"ccc", b"3"), (b"a", b"1"), (b"bb", b"2"), (b"b", b"1")]);
    assert_eq!(keys(&db), vec![b"a".to_vec(), b"b".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);

    db.flush(&FlushOptions::new()).unwrap();
    assert_eq!(get(&db, b"bb"), Some(b"2".to_vec()));
    assert_eq!(
        db.property_value(rockbind::properties::COMPARATOR).as_deref(),
        Some("test.LengthFirst")
    );

    let iter = db.iterator(&ReadOptions::new()).unwrap();
    iter.seek_to_last();
    assert_eq!(iter.key(), Some(b"ccc".to_vec()));
    iter.prev();
    assert_eq!(iter.key(), Some(b"bb".to_vec()));
    db.release_iterator(iter);

    drop(db);
    assert_unregistered(&[token]);
}

#[test]
fn test_comparator_name_checked_on_reopen() {
    let fixture = DbFixture::new();
    drop(fixture.open_with(|opts| opts.set_comparator(&NativeComparator::new(LengthFirst))));

    let mut opts = common::create_options();
    opts.set_comparator(&NativeComparator::reverse_bytewise()).unwrap();
    let err = rockbind::DB::open(&opts, fixture.path()).unwrap_err();
    assert!(err.status().unwrap().is_invalid_argument());
}

#[test]
fn test_merge_on_read_and_at_compaction() {
    let fixture = DbFixture::new();
    let op = NativeMergeOperator::associative(Add);
    let db = fixture.open_with(|opts| opts.set_merge_operator(&op));
    let write = WriteOptions::new();

    db.put(&write, b"counter", b"10").unwrap();
    db.merge(&write, b"counter", b"5").unwrap();
    db.merge(&write, b"counter", b"-3").unwrap();
    assert_eq!(get(&db, b"counter"), Some(b"12".to_vec()));

    db.flush(&FlushOptions::new()).unwrap();
    db.merge(&write, b"counter", b"1").unwrap();
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, b"counter"), Some(b"13".to_vec()));
    assert_eq!(db.property_int_value(rockbind::properties::NUM_COMPACTIONS), Some(1));

    drop(db);
    let db = fixture.open_with(|opts| opts.set_merge_operator(&op));
    assert_eq!(get(&db, b"counter"), Some(b"13".to_vec()));
}

#[test]
fn test_compaction_resolves_merge_operands() {
    let fixture = DbFixture::new();
    let full_merges = Arc::new(AtomicUsize::new(0));
    let op = NativeMergeOperator::new(CountingAppend {
        full_merges: Arc::clone(&full_merges),
    });
    let db = fixture.open_with(|opts| opts.set_merge_operator(&op));
    let write = WriteOptions::new();
    db.merge(&write, b"log", b"a").unwrap();
    db.merge(&write, b"log", b"b").unwrap();

    db.compact_range(None, None).unwrap();
    assert!(full_merges.load(AtomicOrdering::SeqCst) >= 1);

    // Resolved to a plain value, so reads no longer merge
    let before = full_merges.load(AtomicOrdering::SeqCst);
    assert_eq!(get(&db, b"log"), Some(b"a,b".to_vec()));
    assert_eq!(full_merges.load(AtomicOrdering::SeqCst), before);
}

#[test]
fn test_panicking_merge_operator_reports_corruption() {
    let fixture = DbFixture::new();
    let op = NativeMergeOperator::new(Panicking);
    let db = fixture.open_with(|opts| opts.set_merge_operator(&op));
    db.merge(&WriteOptions::new(), b"k", b"v").unwrap();

    let err = db.get(&ReadOptions::new(), b"k").unwrap_err();
    assert!(err.status().unwrap().is_corruption());
}

#[test]
fn test_compaction_filter_removes_and_changes() {
    let fixture = DbFixture::new();
    let filter = NativeCompactionFilter::new(Housekeeping);
    let token = filter.token().unwrap();
    let db = fixture.open_with(|opts| opts.set_compaction_filter(&filter));
    drop(filter);

    put_all(&db, &[(b"tmp:1", b"x"), (b"up:1", b"quiet"), (b"keep", b"same")]);
    db.compact_range(None, None).unwrap();

    assert_eq!(get(&db, b"tmp:1"), None);
    assert_eq!(get(&db, b"up:1"), Some(b"QUIET".to_vec()));
    assert_eq!(get(&db, b"keep"), Some(b"same".to_vec()));

    drop(db);
    assert_unregistered(&[token]);
}

#[test]
fn test_compaction_filter_respects_range() {
    let fixture = DbFixture::new();
    let filter = NativeCompactionFilter::new(Housekeeping);
    let db = fixture.open_with(|opts| opts.set_compaction_filter(&filter));
    put_all(&db, &[(b"tmp:a", b"x"), (b"tmp:z", b"x")]);

    db.compact_range(Some(b"tmp:a"), Some(b"tmp:m")).unwrap();
    assert_eq!(get(&db, b"tmp:a"), None);
    assert_eq!(get(&db, b"tmp:z"), Some(b"x".to_vec()));
}

#[test]
fn test_snapshot_holds_back_compaction_filter() {
    let fixture = DbFixture::new();
    let filter = NativeCompactionFilter::new(Housekeeping);
    let db = fixture.open_with(|opts| opts.set_compaction_filter(&filter));
    put_all(&db, &[(b"tmp:1", b"x")]);

    let snapshot = db.snapshot().unwrap();
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, b"tmp:1"), Some(b"x".to_vec()));

    db.release_snapshot(snapshot);
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, b"tmp:1"), None);
}

#[test]
fn test_factory_filters_live_for_one_run() {
    let fixture = DbFixture::new();
    let counters = Arc::new(RunCounters::default());
    let factory = NativeCompactionFilterFactory::new(PerRunFactory {
        counters: Arc::clone(&counters),
    });
    let token = factory.token().unwrap();
    let db = fixture.open_with(|opts| opts.set_compaction_filter_factory(&factory));
    drop(factory);

    put_all(&db, &[(b"expired", b"x"), (b"fresh", b"y")]);
    db.compact_range(None, None).unwrap();
    assert_eq!(counters.created.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(counters.dropped.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(counters.filtered.load(AtomicOrdering::SeqCst), 2);
    assert_eq!(get(&db, b"expired"), None);

    put_all(&db, &[(b"later", b"z")]);
    db.compact_range(None, None).unwrap();
    assert_eq!(counters.created.load(AtomicOrdering::SeqCst), 2);
    assert_eq!(counters.dropped.load(AtomicOrdering::SeqCst), 2);
    assert_eq!(counters.manual.load(AtomicOrdering::SeqCst), 2);

    drop(db);
    assert_unregistered(&[token]);
}

#[test]
fn test_v2_factory_batches_by_its_own_prefix() {
    let fixture = DbFixture::new();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let factory = NativeCompactionFilterFactoryV2::new(BatchRecorderFactory {
        batches: Arc::clone(&batches),
    });
    // No column family prefix extractor
    let db = fixture.open_with(|opts| opts.set_compaction_filter_factory_v2(&factory));

    put_all(
        &db,
        &[
            (b"a:1", b"keep"),
            (b"a:2", b"keep"),
            (b"b:1", b"drop"),
            (b"b:2", b"keep"),
            (b"c:1", b"keep"),
        ],
    );
    db.compact_range(None, None).unwrap();

    assert_eq!(*batches.lock().unwrap(), vec![2, 2, 1]);
    assert_eq!(get(&db, b"a:2"), Some(b"keep".to_vec()));
    assert_eq!(get(&db, b"b:2"), None);
    assert_eq!(get(&db, b"c:1"), Some(b"keep".to_vec()));
}

#[test]
fn test_prefix_iteration_stops_at_boundary() {
    let fixture = DbFixture::new();
    let transform = NativeSliceTransform::new(Namespace);
    let db = fixture.open_with(|opts| opts.set_prefix_extractor(&transform));
    put_all(
        &db,
        &[(b"order:1", b"o1"), (b"order:2", b"o2"), (b"user:1", b"u1"), (b"user:2", b"u2")],
    );

    let mut read = ReadOptions::new();
    read.set_prefix_same_as_start(true);
    let iter = db.iterator(&read).unwrap();
    iter.seek(b"order:");
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push(iter.key().unwrap());
        iter.next();
    }
    iter.status().unwrap();
    assert_eq!(seen, vec![b"order:1".to_vec(), b"order:2".to_vec()]);

    let mut bounded = ReadOptions::new();
    bounded.set_iterate_upper_bound(Some(b"user:2"));
    let iter = db.iterator(&bounded).unwrap();
    assert_eq!(iter.entries().len(), 3);
}

#[test]
fn test_filter_policy_consulted_on_reads() {
    let fixture = DbFixture::new();
    let lookups = Arc::new(AtomicUsize::new(0));
    let policy = NativeFilterPolicy::new(ExactSet {
        lookups: Arc::clone(&lookups),
    });
    let token = policy.token().unwrap();
    let db = fixture.open_with(|opts| opts.set_filter_policy(&policy));
    drop(policy);

    put_all(&db, &[(b"present", b"1")]);
    db.flush(&FlushOptions::new()).unwrap();

    assert_eq!(get(&db, b"present"), Some(b"1".to_vec()));
    assert_eq!(get(&db, b"absent"), None);
    assert!(lookups.load(AtomicOrdering::SeqCst) >= 2);

    drop(db);
    assert_unregistered(&[token]);
}

#[test]
fn test_full_filter_builder_and_reader() {
    let fixture = DbFixture::new();
    let lookups = Arc::new(AtomicUsize::new(0));
    let policy = NativeFilterPolicy::new(ExactBits {
        lookups: Arc::clone(&lookups),
    });
    let db = fixture.open_with(|opts| opts.set_filter_policy(&policy));

    put_all(&db, &[(b"k1", b"v1"), (b"k2", b"v2")]);
    db.flush(&FlushOptions::new()).unwrap();

    assert_eq!(get(&db, b"k2"), Some(b"v2".to_vec()));
    assert_eq!(get(&db, b"k3"), None);
    assert!(lookups.load(AtomicOrdering::SeqCst) >= 2);

    let cf = db.default_column_family().unwrap();
    let (may_exist, _) = db.key_may_exist_cf(&ReadOptions::new(), &cf, b"k3").unwrap();
    assert!(!may_exist);
}

#[test]
fn test_every_registration_removed_after_drop() {
    let fixture = DbFixture::new();
    let cmp = NativeComparator::new(LengthFirst);
    let merge = NativeMergeOperator::associative(Add);
    let filter = NativeCompactionFilter::new(Housekeeping);
    let transform = NativeSliceTransform::new(Namespace);
    let policy = NativeFilterPolicy::new(ExactSet {
        lookups: Arc::new(AtomicUsize::new(0)),
    });
    let tokens: Vec<Token> = [
        cmp.token(),
        merge.token(),
        filter.token(),
        transform.token(),
        policy.token(),
    ]
    .into_iter()
    .flatten()
    .collect();
    assert_eq!(tokens.len(), 5);

    let db = fixture.open_with(|opts| {
        opts.set_comparator(&cmp)?;
        opts.set_merge_operator(&merge)?;
        opts.set_compaction_filter(&filter)?;
        opts.set_prefix_extractor(&transform)?;
        opts.set_filter_policy(&policy)
    });
    drop((cmp, merge, filter, transform, policy));

    put_all(&db, &[(b"a:1", b"1"), (b"tmp:x", b"2")]);
    db.merge(&WriteOptions::new(), b"a:1", b"4").unwrap();
    db.flush(&FlushOptions::new()).unwrap();
    db.compact_range(None, None).unwrap();
    assert_eq!(get(&db, b"a:1"), Some(b"5".to_vec()));
    assert_eq!(get(&db, b"tmp:x"), None);

    drop(db);
    assert_unregistered(&tokens);
}
