//! Database engine
//!
//! ```text
//! write ──▶ LOG.wal ──▶ memtable ──flush──▶ tables (newest first) ──compact──▶ one table
//!                                                                                 │
//!                                             LOG.wal rewritten as checkpoints ◀──┘
//! ```
//!
//! Every column family has its own memtable and tables, ordered by its own
//! comparator. Sequence numbers are shared by the whole database: a write
//! batch takes one consecutive run of them and becomes visible at once when
//! `last_sequence` advances past it.
//!
//! Lock order: the log mutex, then a column family's state lock. Flushes and
//! compactions take only the state lock.
//!
//! A database opened read-only replays the log once and never writes to its
//! directory: no lock file, no log writer, no manifest updates.

use crate::compaction::{self, merge_sources, CompactionRequest, CompactionStats};
use crate::log::{self, LogRecord, LogWriter, RecordPayload, LOG_FILE};
use crate::manifest::{Manifest, DEFAULT_COLUMN_FAMILY_NAME, MANIFEST_FILE};
use crate::memtable::{Memtable, MemtableEntry, Version};
use crate::merge::{collapse, group_by_key, resolve};
use crate::options::{FlushOptions, Options, ReadOptions, WriteOptions};
use crate::snapshot::{rb_snapshot_t, SnapshotList};
use crate::table::Table;
use crate::write_batch::{BatchOp, WriteBatch};
use rockbind_core::{Comparator, Error, Result, Status};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock marker file name
pub const LOCK_FILE: &str = "LOCK";

/// Property names understood by [`Db::property`]
pub mod properties {
    pub const NUM_ENTRIES_ACTIVE_MEM_TABLE: &str = "rockbind.num-entries-active-mem-table";
    pub const CUR_SIZE_ACTIVE_MEM_TABLE: &str = "rockbind.cur-size-active-mem-table";
    pub const NUM_IMMUTABLE_TABLES: &str = "rockbind.num-immutable-tables";
    pub const ESTIMATE_NUM_KEYS: &str = "rockbind.estimate-num-keys";
    pub const NUM_SNAPSHOTS: &str = "rockbind.num-snapshots";
    pub const OLDEST_SNAPSHOT_SEQUENCE: &str = "rockbind.oldest-snapshot-sequence";
    pub const NUM_COMPACTIONS: &str = "rockbind.num-compactions";
    pub const COMPARATOR: &str = "rockbind.comparator";
}

fn locked_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static LOCKED: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    LOCKED.get_or_init(Default::default)
}

/// Exclusive use of a database directory within this process.
struct PathLock {
    path: PathBuf,
}

impl PathLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let path = fs::canonicalize(dir)?;
        {
            let mut locked = locked_paths().lock().map_err(|_| Error::LockPoisoned)?;
            if !locked.insert(path.clone()) {
                return Err(Status::io_error(format!(
                    "lock {}: already held by process",
                    path.join(LOCK_FILE).display()
                ))
                .into());
            }
        }
        let lock = Self { path };
        File::create(lock.path.join(LOCK_FILE))?;
        Ok(lock)
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        if let Ok(mut locked) = locked_paths().lock() {
            locked.remove(&self.path);
        }
    }
}

struct CfState {
    mem: Memtable,
    /// Newest first
    tables: Vec<Table>,
}

/// One column family: a keyspace with its own options and comparator.
pub struct ColumnFamily {
    id: u32,
    name: String,
    options: Options,
    state: RwLock<CfState>,
    next_table_id: AtomicU64,
    compactions: AtomicU64,
    dropped: AtomicBool,
}

/// The newest version read so far is a value or a tombstone.
fn terminated(chain: &[&Version]) -> bool {
    chain.last().map_or(false, |v| !v.entry.is_merge())
}

impl ColumnFamily {
    fn new(id: u32, name: String, options: Options) -> Self {
        let mem = Memtable::new(Arc::clone(&options.comparator));
        Self {
            id,
            name,
            options,
            state: RwLock::new(CfState {
                mem,
                tables: Vec::new(),
            }),
            next_table_id: AtomicU64::new(1),
            compactions: AtomicU64::new(0),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(AtomicOrdering::SeqCst)
    }

    fn comparator(&self) -> &dyn Comparator {
        self.options.comparator.as_ref()
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, CfState>> {
        self.state.read().map_err(|_| Error::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, CfState>> {
        self.state.write().map_err(|_| Error::LockPoisoned)
    }

    fn apply(state: &mut CfState, op: BatchOp, sequence: u64) {
        match op {
            BatchOp::Put { key, value, .. } => {
                state.mem.insert(key, sequence, MemtableEntry::Value(value))
            }
            BatchOp::Merge { key, value, .. } => {
                state.mem.insert(key, sequence, MemtableEntry::Merge(value))
            }
            BatchOp::Delete { key, .. } => {
                state.mem.insert(key, sequence, MemtableEntry::Tombstone)
            }
        }
    }

    fn get(&self, key: &[u8], sequence: u64) -> Result<Option<Vec<u8>>> {
        let state = self.read_state()?;
        let visible = |v: &&Version| v.sequence <= sequence;

        let mut chain: Vec<&Version> = state.mem.get(key).iter().filter(visible).collect();
        for table in &state.tables {
            if terminated(&chain) {
                break;
            }
            if !table.may_contain(key) {
                continue;
            }
            chain.extend(table.get(key).iter().filter(visible));
        }
        resolve(key, chain, self.options.merge_operator.as_deref())
    }

    /// `false` only if `key` certainly has no value. The value is returned
    /// when it was found without searching a table.
    fn key_may_exist(&self, key: &[u8], sequence: u64) -> Result<(bool, Option<Vec<u8>>)> {
        let state = self.read_state()?;
        let chain: Vec<&Version> = state
            .mem
            .get(key)
            .iter()
            .filter(|v| v.sequence <= sequence)
            .collect();

        if terminated(&chain) {
            return Ok(
                match resolve(key, chain, self.options.merge_operator.as_deref()) {
                    Ok(Some(value)) => (true, Some(value)),
                    Ok(None) => (false, None),
                    Err(_) => (true, None),
                },
            );
        }
        if !chain.is_empty() {
            return Ok((true, None));
        }
        Ok((state.tables.iter().any(|t| t.may_contain(key)), None))
    }

    /// Resolved key/value pairs visible at `sequence`, in comparator order,
    /// stopping before `upper_bound`.
    pub(crate) fn entries(
        &self,
        sequence: u64,
        upper_bound: Option<&[u8]>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.read_state()?;
        let cmp = self.comparator();

        let mut sources: Vec<&[Version]> = vec![state.mem.versions()];
        sources.extend(state.tables.iter().map(Table::versions));
        let visible: Vec<&Version> = merge_sources(cmp, &sources)
            .into_iter()
            .filter(|v| v.sequence <= sequence)
            .collect();

        let mut entries = Vec::new();
        let mut start = 0;
        while start < visible.len() {
            let key = &visible[start].key;
            if let Some(bound) = upper_bound {
                if cmp.compare(key, bound) != Ordering::Less {
                    break;
                }
            }
            let mut end = start + 1;
            while end < visible.len() && cmp.compare(&visible[end].key, key) == Ordering::Equal {
                end += 1;
            }
            let versions = visible[start..end].iter().copied();
            if let Some(value) = resolve(key, versions, self.options.merge_operator.as_deref())? {
                entries.push((key.clone(), value));
            }
            start = end;
        }
        Ok(entries)
    }

    /// Freeze the memtable into a new table. Without `keep_history`, shadowed
    /// versions are dropped and merge runs collapsed.
    fn flush_locked(&self, state: &mut CfState, keep_history: bool) {
        if state.mem.is_empty() {
            return;
        }
        let mem = std::mem::replace(
            &mut state.mem,
            Memtable::new(Arc::clone(&self.options.comparator)),
        );
        let mut versions = mem.drain();
        if !keep_history {
            let merge_operator = self.options.merge_operator.as_deref();
            versions = group_by_key(self.comparator(), versions)
                .into_iter()
                .flat_map(|group| collapse(group, merge_operator))
                .collect();
        }

        let id = self.next_table_id.fetch_add(1, AtomicOrdering::SeqCst);
        let table = Table::build(id, versions, &self.options);
        tracing::debug!(
            column_family = %self.name,
            table = id,
            versions = table.len(),
            "flushed memtable"
        );
        state.tables.insert(0, table);
    }

    fn maybe_flush(&self, keep_history: bool) -> Result<()> {
        let mut state = self.write_state()?;
        if state.mem.size_bytes() >= self.options.write_buffer_size {
            self.flush_locked(&mut state, keep_history);
        }
        Ok(())
    }

    fn compact(
        &self,
        request: CompactionRequest<'_>,
        keep_history: bool,
    ) -> Result<CompactionStats> {
        let mut state = self.write_state()?;
        self.flush_locked(&mut state, keep_history);

        let inputs: Vec<&[Version]> = state.tables.iter().map(Table::versions).collect();
        let (output, stats) = compaction::compact(&self.options, &inputs, request, keep_history);

        state.tables = if output.is_empty() {
            Vec::new()
        } else {
            let id = self.next_table_id.fetch_add(1, AtomicOrdering::SeqCst);
            vec![Table::build(id, output, &self.options)]
        };
        self.compactions.fetch_add(1, AtomicOrdering::SeqCst);

        tracing::info!(
            column_family = %self.name,
            input_versions = stats.input_versions,
            output_versions = stats.output_versions,
            removed = stats.entries_removed,
            changed = stats.entries_changed,
            "compaction finished"
        );
        Ok(stats)
    }

    fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Result<Vec<u64>> {
        let state = self.read_state()?;
        let cmp = self.comparator();
        let sizes = ranges
            .iter()
            .map(|(start, limit)| {
                state
                    .tables
                    .iter()
                    .flat_map(Table::versions)
                    .filter(|v| {
                        cmp.compare(&v.key, start) != Ordering::Less
                            && cmp.compare(&v.key, limit) == Ordering::Less
                    })
                    // 8 bytes of sequence number per version
                    .map(|v| (v.key.len() + v.entry.size() + 8) as u64)
                    .sum::<u64>()
            })
            .collect();
        Ok(sizes)
    }

    /// Every stored version, for a log checkpoint.
    fn all_versions(&self) -> Result<Vec<Version>> {
        let state = self.read_state()?;
        let mut versions = state.mem.versions().to_vec();
        for table in &state.tables {
            versions.extend_from_slice(table.versions());
        }
        Ok(versions)
    }

    fn property(&self, name: &str, snapshots: &SnapshotList) -> Result<Option<String>> {
        let state = self.read_state()?;
        let value = match name {
            properties::NUM_ENTRIES_ACTIVE_MEM_TABLE => state.mem.len().to_string(),
            properties::CUR_SIZE_ACTIVE_MEM_TABLE => state.mem.size_bytes().to_string(),
            properties::NUM_IMMUTABLE_TABLES => state.tables.len().to_string(),
            properties::ESTIMATE_NUM_KEYS => {
                let stored: usize = state.tables.iter().map(Table::len).sum();
                (stored + state.mem.len()).to_string()
            }
            properties::NUM_SNAPSHOTS => snapshots.count().to_string(),
            properties::OLDEST_SNAPSHOT_SEQUENCE => snapshots.oldest().unwrap_or(0).to_string(),
            properties::NUM_COMPACTIONS => {
                self.compactions.load(AtomicOrdering::SeqCst).to_string()
            }
            properties::COMPARATOR => self.options.comparator.name().to_string(),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

impl std::fmt::Debug for ColumnFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFamily")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dropped", &self.is_dropped())
            .finish()
    }
}

/// An open database
pub struct Db {
    path: PathBuf,
    column_families: RwLock<BTreeMap<u32, Arc<ColumnFamily>>>,
    last_sequence: AtomicU64,
    snapshots: Arc<SnapshotList>,
    log: Mutex<Option<LogWriter>>,
    manifest: Mutex<Manifest>,
    /// `None` when read-only
    lock: Option<PathLock>,
}

impl Db {
    /// Open a database with only the default column family.
    pub fn open(options: &Options, path: &Path) -> Result<Self> {
        let descriptors = [(DEFAULT_COLUMN_FAMILY_NAME.to_string(), options.clone())];
        let (db, _) = Self::open_column_families(options, path, &descriptors)?;
        Ok(db)
    }

    /// Open a database and the listed column families. Every column family
    /// the database has must be listed.
    pub fn open_column_families(
        db_options: &Options,
        path: &Path,
        descriptors: &[(String, Options)],
    ) -> Result<(Self, Vec<Arc<ColumnFamily>>)> {
        if !path.exists() {
            if !db_options.create_if_missing {
                return Err(Status::invalid_argument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    path.display()
                ))
                .into());
            }
            fs::create_dir_all(path)?;
        }
        let lock = PathLock::acquire(path)?;

        let mut manifest = match Manifest::load(path)? {
            Some(_) if db_options.error_if_exists => {
                return Err(Status::invalid_argument(format!(
                    "{}: exists (error_if_exists is true)",
                    path.display()
                ))
                .into())
            }
            Some(manifest) => manifest,
            None if !db_options.create_if_missing => {
                return Err(Status::invalid_argument(format!(
                    "{}: does not exist (create_if_missing is false)",
                    path.display()
                ))
                .into())
            }
            None => {
                let comparator = descriptors
                    .iter()
                    .find(|(name, _)| name == DEFAULT_COLUMN_FAMILY_NAME)
                    .map_or(db_options.comparator.name(), |(_, o)| o.comparator.name());
                tracing::info!(path = %path.display(), "creating database");
                Manifest::new(comparator)
            }
        };

        let missing: Vec<&str> = manifest
            .column_families
            .iter()
            .filter(|meta| !descriptors.iter().any(|(name, _)| name == &meta.name))
            .map(|meta| meta.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Status::invalid_argument(format!(
                "Column families not opened: {}",
                missing.join(", ")
            ))
            .into());
        }

        let mut column_families = BTreeMap::new();
        let mut handles = Vec::with_capacity(descriptors.len());
        for (name, options) in descriptors {
            let id = match manifest.find(name) {
                Some(meta) if meta.comparator != options.comparator.name() => {
                    return Err(Status::invalid_argument(format!(
                        "{}: does not match existing comparator {}",
                        options.comparator.name(),
                        meta.comparator
                    ))
                    .into());
                }
                Some(meta) => meta.id,
                None if !db_options.create_missing_column_families => {
                    return Err(Status::invalid_argument(format!(
                        "Column family not found: {}",
                        name
                    ))
                    .into());
                }
                None => manifest.add(name, options.comparator.name()),
            };
            let cf = Arc::new(ColumnFamily::new(id, name.clone(), options.clone()));
            column_families.insert(id, Arc::clone(&cf));
            handles.push(cf);
        }
        manifest.save(path)?;

        let last_sequence = replay(path, &column_families)?;
        for cf in column_families.values() {
            cf.maybe_flush(false)?;
        }

        tracing::info!(
            path = %path.display(),
            column_families = column_families.len(),
            last_sequence,
            "opened database"
        );

        let db = Self {
            path: path.to_path_buf(),
            column_families: RwLock::new(column_families),
            last_sequence: AtomicU64::new(last_sequence),
            snapshots: Arc::new(SnapshotList::default()),
            log: Mutex::new(Some(LogWriter::open(path)?)),
            manifest: Mutex::new(manifest),
            lock: Some(lock),
        };
        Ok((db, handles))
    }

    /// Open the default column family without write access.
    pub fn open_for_read_only(
        options: &Options,
        path: &Path,
        error_if_log_file_exist: bool,
    ) -> Result<Self> {
        let descriptors = [(DEFAULT_COLUMN_FAMILY_NAME.to_string(), options.clone())];
        let (db, _) = Self::open_for_read_only_column_families(
            options,
            path,
            &descriptors,
            error_if_log_file_exist,
        )?;
        Ok(db)
    }

    /// Open some of the database's column families without write access.
    ///
    /// Unlike [`Db::open_column_families`], the list may leave column
    /// families out, but every listed one must exist. Writes, flushes,
    /// compactions and column family changes fail with `NotSupported`. With
    /// `error_if_log_file_exist`, a log holding writes not yet checkpointed
    /// is reported as corruption.
    pub fn open_for_read_only_column_families(
        db_options: &Options,
        path: &Path,
        descriptors: &[(String, Options)],
        error_if_log_file_exist: bool,
    ) -> Result<(Self, Vec<Arc<ColumnFamily>>)> {
        let Some(manifest) = Manifest::load(path)? else {
            return Err(Status::invalid_argument(format!(
                "{}: does not exist (read-only open)",
                path.display()
            ))
            .into());
        };

        let mut column_families = BTreeMap::new();
        let mut handles = Vec::with_capacity(descriptors.len());
        for (name, options) in descriptors {
            let id = match manifest.find(name) {
                Some(meta) if meta.comparator != options.comparator.name() => {
                    return Err(Status::invalid_argument(format!(
                        "{}: does not match existing comparator {}",
                        options.comparator.name(),
                        meta.comparator
                    ))
                    .into());
                }
                Some(meta) => meta.id,
                None => {
                    return Err(Status::invalid_argument(format!(
                        "Column family not found: {}",
                        name
                    ))
                    .into());
                }
            };
            let cf = Arc::new(ColumnFamily::new(id, name.clone(), options.clone()));
            column_families.insert(id, Arc::clone(&cf));
            handles.push(cf);
        }

        if error_if_log_file_exist && has_pending_writes(path)? {
            return Err(Status::corruption(format!(
                "{}: opened read-only with error_if_log_file_exist but the log holds writes",
                path.display()
            ))
            .into());
        }
        let last_sequence = replay(path, &column_families)?;

        tracing::info!(
            path = %path.display(),
            column_families = column_families.len(),
            last_sequence,
            "opened database read-only"
        );

        let db = Self {
            path: path.to_path_buf(),
            column_families: RwLock::new(column_families),
            last_sequence: AtomicU64::new(last_sequence),
            snapshots: Arc::new(SnapshotList::default()),
            log: Mutex::new(None),
            manifest: Mutex::new(manifest),
            lock: None,
        };
        Ok((db, handles))
    }

    pub fn is_read_only(&self) -> bool {
        self.lock.is_none()
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(Status::not_supported(format!(
                "Not supported operation in read only mode: {}",
                operation
            ))
            .into());
        }
        Ok(())
    }

    /// Names of the column families of the database at `path`.
    pub fn list_column_families(path: &Path) -> Result<Vec<String>> {
        match Manifest::load(path)? {
            Some(manifest) => Ok(manifest.names()),
            None => Err(Status::io_error(format!(
                "{}: No such file or directory",
                path.join(MANIFEST_FILE).display()
            ))
            .into()),
        }
    }

    /// Remove the database at `path`. Fails while it is open.
    pub fn destroy(path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let lock = PathLock::acquire(path)?;
        for name in [MANIFEST_FILE, LOG_FILE] {
            for file in [path.join(name), path.join(format!("{}.tmp", name))] {
                if file.exists() {
                    fs::remove_file(&file)?;
                }
            }
        }
        drop(lock);
        fs::remove_file(path.join(LOCK_FILE))?;
        if let Err(e) = fs::remove_dir(path) {
            tracing::debug!(path = %path.display(), error = %e, "left database directory in place");
        }
        tracing::info!(path = %path.display(), "destroyed database");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn column_family(&self, id: u32) -> Result<Option<Arc<ColumnFamily>>> {
        let cfs = self.column_families.read().map_err(|_| Error::LockPoisoned)?;
        Ok(cfs.get(&id).cloned())
    }

    pub fn default_column_family(&self) -> Result<Arc<ColumnFamily>> {
        self.column_family(0)?
            .ok_or_else(|| Status::invalid_argument("default column family missing").into())
    }

    pub fn create_column_family(&self, options: &Options, name: &str) -> Result<Arc<ColumnFamily>> {
        self.check_writable("create column family")?;
        let mut manifest = self.manifest.lock().map_err(|_| Error::LockPoisoned)?;
        if manifest.find(name).is_some() {
            return Err(
                Status::invalid_argument(format!("Column family already exists: {}", name)).into(),
            );
        }
        let id = manifest.add(name, options.comparator.name());
        if let Err(e) = manifest.save(&self.path) {
            manifest.remove(id);
            return Err(e);
        }

        let cf = Arc::new(ColumnFamily::new(id, name.to_string(), options.clone()));
        self.column_families
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .insert(id, Arc::clone(&cf));
        tracing::info!(column_family = name, id, "created column family");
        Ok(cf)
    }

    /// Drop a column family. Existing handles stay valid for reads.
    pub fn drop_column_family(&self, cf: &ColumnFamily) -> Result<()> {
        self.check_writable("drop column family")?;
        if cf.id == 0 {
            return Err(Status::invalid_argument("Can't drop default column family").into());
        }
        let mut manifest = self.manifest.lock().map_err(|_| Error::LockPoisoned)?;
        if !manifest.remove(cf.id) {
            return Err(Status::invalid_argument(format!(
                "Column family already dropped: {}",
                cf.name
            ))
            .into());
        }
        manifest.save(&self.path)?;
        self.column_families
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .remove(&cf.id);
        cf.dropped.store(true, AtomicOrdering::SeqCst);
        tracing::info!(column_family = %cf.name, id = cf.id, "dropped column family");
        Ok(())
    }

    pub fn put(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamily,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf.id, key, value);
        self.write(options, &batch)
    }

    pub fn merge(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamily,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.merge_cf(cf.id, key, value);
        self.write(options, &batch)
    }

    pub fn delete(&self, options: &WriteOptions, cf: &ColumnFamily, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf.id, key);
        self.write(options, &batch)
    }

    /// Apply a batch atomically.
    pub fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> Result<()> {
        self.check_writable("write")?;
        if batch.is_empty() {
            return Ok(());
        }
        let mut touched: Vec<Arc<ColumnFamily>> = Vec::new();
        {
            let mut log = self.log.lock().map_err(|_| Error::LockPoisoned)?;

            let targets: Vec<Arc<ColumnFamily>> = {
                let cfs = self.column_families.read().map_err(|_| Error::LockPoisoned)?;
                batch
                    .ops()
                    .iter()
                    .map(|op| {
                        cfs.get(&op.column_family()).cloned().ok_or_else(|| {
                            Error::from(Status::invalid_argument(format!(
                                "Invalid column family specified in write batch: {}",
                                op.column_family()
                            )))
                        })
                    })
                    .collect::<Result<_>>()?
            };

            let first = self.last_sequence.load(AtomicOrdering::SeqCst) + 1;
            let ops = batch.ops().to_vec();
            if let (false, Some(log)) = (options.disable_wal, log.as_mut()) {
                log.append(&LogRecord::batch(first, ops.clone()), options.sync)?;
            }

            let count = ops.len() as u64;
            for ((op, cf), sequence) in ops.into_iter().zip(&targets).zip(first..) {
                let mut state = cf.write_state()?;
                ColumnFamily::apply(&mut state, op, sequence);
            }
            self.last_sequence
                .store(first + count - 1, AtomicOrdering::SeqCst);

            for cf in targets {
                if !touched.iter().any(|t| t.id == cf.id) {
                    touched.push(cf);
                }
            }
        }

        let keep_history = !self.snapshots.is_empty();
        for cf in touched {
            cf.maybe_flush(keep_history)?;
        }
        Ok(())
    }

    fn read_sequence(&self, options: &ReadOptions) -> u64 {
        options.snapshot.as_ref().map_or_else(
            || self.last_sequence.load(AtomicOrdering::SeqCst),
            |pin| pin.sequence(),
        )
    }

    pub fn get(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamily,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        cf.get(key, self.read_sequence(options))
    }

    /// Point lookups at one consistent sequence number.
    pub fn multi_get(
        &self,
        options: &ReadOptions,
        keys: &[(&ColumnFamily, &[u8])],
    ) -> Vec<Result<Option<Vec<u8>>>> {
        let sequence = self.read_sequence(options);
        keys.iter().map(|(cf, key)| cf.get(key, sequence)).collect()
    }

    pub fn key_may_exist(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamily,
        key: &[u8],
    ) -> Result<(bool, Option<Vec<u8>>)> {
        cf.key_may_exist(key, self.read_sequence(options))
    }

    /// Materialized view for an iterator.
    pub fn scan(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamily,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        cf.entries(
            self.read_sequence(options),
            options.iterate_upper_bound.as_deref(),
        )
    }

    /// Views of several column families at one sequence number.
    pub fn scan_many(
        &self,
        options: &ReadOptions,
        cfs: &[&ColumnFamily],
    ) -> Vec<Result<Vec<(Vec<u8>, Vec<u8>)>>> {
        let sequence = self.read_sequence(options);
        let upper_bound = options.iterate_upper_bound.as_deref();
        cfs.iter().map(|cf| cf.entries(sequence, upper_bound)).collect()
    }

    /// Estimated bytes stored in tables for each `[start, limit)` range.
    /// Writes still in the memtable are not counted.
    pub fn approximate_sizes(
        &self,
        cf: &ColumnFamily,
        ranges: &[(&[u8], &[u8])],
    ) -> Result<Vec<u64>> {
        cf.approximate_sizes(ranges)
    }

    /// Logged write batches from the one holding `sequence` on, paired with
    /// their first sequence number.
    ///
    /// Fails with `NotFound` when `sequence` was folded into a checkpoint by
    /// a compaction or has not been written yet. Writes made with
    /// `disable_wal` are absent.
    pub fn updates_since(&self, sequence: u64) -> Result<Vec<(u64, WriteBatch)>> {
        let latest = self.latest_sequence_number();
        if sequence > latest {
            return Err(Status::not_found(format!(
                "Requested sequence not yet written in the db: {} > {}",
                sequence, latest
            ))
            .into());
        }

        let records = {
            let _log = self.log.lock().map_err(|_| Error::LockPoisoned)?;
            log::read_all(&self.path)?
        };
        let mut checkpointed = 0;
        let mut updates = Vec::new();
        for record in records {
            match record.payload {
                RecordPayload::Checkpoint { last_sequence, .. } => {
                    checkpointed = checkpointed.max(last_sequence);
                }
                RecordPayload::Batch { sequence: first, ops } => {
                    let last = first + (ops.len() as u64).saturating_sub(1);
                    if last >= sequence {
                        updates.push((first, WriteBatch::from_ops(ops)));
                    }
                }
            }
        }
        if checkpointed > 0 && sequence <= checkpointed {
            return Err(Status::not_found(format!(
                "Requested sequence {} is older than the log (checkpointed through {})",
                sequence, checkpointed
            ))
            .into());
        }
        tracing::debug!(sequence, batches = updates.len(), "read updates from log");
        Ok(updates)
    }

    pub fn snapshot(&self) -> Result<rb_snapshot_t> {
        let sequence = self.last_sequence.load(AtomicOrdering::SeqCst);
        let snapshot = rb_snapshot_t::new(sequence, Arc::clone(&self.snapshots))?;
        tracing::debug!(sequence, "created snapshot");
        Ok(snapshot)
    }

    /// Whether `snapshot` was taken from this database.
    pub fn owns_snapshot(&self, snapshot: &rb_snapshot_t) -> bool {
        snapshot.belongs_to(&self.snapshots)
    }

    pub fn flush(&self, _options: &FlushOptions, cf: &ColumnFamily) -> Result<()> {
        self.check_writable("flush")?;
        let keep_history = !self.snapshots.is_empty();
        let mut state = cf.write_state()?;
        cf.flush_locked(&mut state, keep_history);
        Ok(())
    }

    /// Compact `cf`, filtering keys in `[start, limit)`, then checkpoint the log.
    pub fn compact_range(
        &self,
        cf: &ColumnFamily,
        start: Option<&[u8]>,
        limit: Option<&[u8]>,
    ) -> Result<CompactionStats> {
        self.check_writable("compact range")?;
        let request = CompactionRequest {
            start,
            limit,
            manual: true,
        };
        let stats = cf.compact(request, !self.snapshots.is_empty())?;
        self.checkpoint()?;
        Ok(stats)
    }

    /// Rewrite the log as one checkpoint record per column family.
    fn checkpoint(&self) -> Result<()> {
        let mut log = self.log.lock().map_err(|_| Error::LockPoisoned)?;
        let last_sequence = self.last_sequence.load(AtomicOrdering::SeqCst);
        let records = {
            let cfs = self.column_families.read().map_err(|_| Error::LockPoisoned)?;
            cfs.values()
                .map(|cf| Ok(LogRecord::checkpoint(cf.id, last_sequence, cf.all_versions()?)))
                .collect::<Result<Vec<_>>>()?
        };
        *log = Some(log::rewrite(&self.path, &records)?);
        tracing::debug!(records = records.len(), last_sequence, "checkpointed log");
        Ok(())
    }

    pub fn property(&self, cf: &ColumnFamily, name: &str) -> Result<Option<String>> {
        cf.property(name, &self.snapshots)
    }

    pub fn latest_sequence_number(&self) -> u64 {
        self.last_sequence.load(AtomicOrdering::SeqCst)
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        tracing::info!(path = %self.path.display(), "closing database");
    }
}

/// Whether the log holds batch records not yet folded into a checkpoint.
fn has_pending_writes(path: &Path) -> Result<bool> {
    Ok(log::read_all(path)?
        .iter()
        .any(|record| matches!(record.payload, RecordPayload::Batch { .. })))
}

/// Replay the log into the memtables, returning the last sequence number.
/// Records for unknown (dropped) column families are skipped.
fn replay(path: &Path, column_families: &BTreeMap<u32, Arc<ColumnFamily>>) -> Result<u64> {
    let mut last_sequence = 0;
    let mut replayed = 0usize;
    for record in log::read_all(path)? {
        match record.payload {
            RecordPayload::Batch { sequence, ops } => {
                let count = ops.len() as u64;
                for (op, seq) in ops.into_iter().zip(sequence..) {
                    if let Some(cf) = column_families.get(&op.column_family()) {
                        let mut state = cf.write_state()?;
                        ColumnFamily::apply(&mut state, op, seq);
                    }
                }
                last_sequence = last_sequence.max(sequence + count.saturating_sub(1));
            }
            RecordPayload::Checkpoint {
                column_family,
                last_sequence: checkpointed,
                versions,
            } => {
                if let Some(cf) = column_families.get(&column_family) {
                    let mut state = cf.write_state()?;
                    for version in versions {
                        state.mem.insert(version.key, version.sequence, version.entry);
                    }
                }
                last_sequence = last_sequence.max(checkpointed);
            }
        }
        replayed += 1;
    }
    if replayed > 0 {
        tracing::debug!(path = %path.display(), records = replayed, last_sequence, "replayed log");
    }
    Ok(last_sequence)
}
