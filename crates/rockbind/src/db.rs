//! The database handle.

use crate::column_family::ColumnFamilyHandle;
use crate::handle::{guard_all, Handle, HandleGuard, NativeResource};
use crate::iterator::DbIterator;
use crate::marshal::{as_c, cstring, opt_c, path_cstring, take_bytes, take_string, with_status};
use crate::options::{FlushOptions, Options, ReadOptions, WriteOptions};
use crate::snapshot::Snapshot;
use crate::transaction_log::TransactionLogIterator;
use crate::write_batch::WriteBatch;
use libc::{c_char, c_int};
use rockbind_core::{Error, Result, Status};
use rockbind_native as ffi;
use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

impl NativeResource for ffi::rb_t {
    const KIND: &'static str = "database";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_close(raw)
    }
}

/// State shared between a database and the children created from it.
///
/// Children hold an `Arc` to it so that, when both are dropped, a child is
/// always released before its parent. The database never refers to its
/// children.
pub(crate) struct DbInner {
    handle: Handle<ffi::rb_t>,
    path: PathBuf,
}

impl DbInner {
    fn raw(&self) -> Result<HandleGuard<'_, ffi::rb_t>> {
        self.handle.require()
    }
}

impl fmt::Debug for DbInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbInner")
            .field("path", &self.path)
            .field("released", &self.handle.is_released())
            .finish()
    }
}

/// An open database.
///
/// All methods take `&self`; the engine synchronises concurrent reads and
/// writes. [`DB::close`] waits for calls in progress on other threads, and
/// every later call fails with an invalid argument.
pub struct DB {
    inner: Arc<DbInner>,
}

type CfGuard<'a> = HandleGuard<'a, ffi::rb_column_family_handle_t>;

fn not_found_to_none(result: Result<Vec<u8>>) -> Result<Option<Vec<u8>>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

// `None` stands for the default column family; a released handle is an error
fn cf_guard(cf: Option<&ColumnFamilyHandle>) -> Result<Option<CfGuard<'_>>> {
    cf.map(ColumnFamilyHandle::raw).transpose()
}

fn cf_ptr(guard: &Option<CfGuard<'_>>) -> *const ffi::rb_column_family_handle_t {
    guard.as_ref().map_or(ptr::null(), |g| g.as_ptr())
}

impl DB {
    /// Open the database at `path` with its default column family only.
    pub fn open<P: AsRef<Path>>(options: &Options, path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path_cstring(path)?;
        let raw = with_status(|status| unsafe {
            ffi::rb_open(options.as_ptr(), name.as_ptr(), status)
        })?;
        Ok(Self::from_raw(raw, path))
    }

    /// Open the database with the named column families, each with its own
    /// options. Every existing column family must be listed.
    pub fn open_column_families<P: AsRef<Path>>(
        options: &Options,
        path: P,
        column_families: &[(&str, &Options)],
    ) -> Result<(Self, Vec<ColumnFamilyHandle>)> {
        Self::open_families(
            path.as_ref(),
            column_families,
            |name, num, names, cf_options, handles, status| unsafe {
                ffi::rb_open_column_families(
                    options.as_ptr(),
                    name,
                    num,
                    names,
                    cf_options,
                    handles,
                    status,
                )
            },
        )
    }

    /// Open the database without write access. Writes, flushes, compactions
    /// and column family changes report `NotSupported`; no lock is taken,
    /// so another process may have the database open for writing.
    ///
    /// With `error_if_log_file_exist`, writes still waiting in the log are
    /// an error instead of being replayed.
    pub fn open_for_read_only<P: AsRef<Path>>(
        options: &Options,
        path: P,
        error_if_log_file_exist: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let name = path_cstring(path)?;
        let raw = with_status(|status| unsafe {
            ffi::rb_open_for_read_only(
                options.as_ptr(),
                name.as_ptr(),
                error_if_log_file_exist as u8,
                status,
            )
        })?;
        Ok(Self::from_raw(raw, path))
    }

    /// Read-only counterpart of [`DB::open_column_families`]. The list may
    /// leave existing column families out.
    pub fn open_for_read_only_column_families<P: AsRef<Path>>(
        options: &Options,
        path: P,
        column_families: &[(&str, &Options)],
        error_if_log_file_exist: bool,
    ) -> Result<(Self, Vec<ColumnFamilyHandle>)> {
        Self::open_families(
            path.as_ref(),
            column_families,
            |name, num, names, cf_options, handles, status| unsafe {
                ffi::rb_open_for_read_only_column_families(
                    options.as_ptr(),
                    name,
                    num,
                    names,
                    cf_options,
                    handles,
                    error_if_log_file_exist as u8,
                    status,
                )
            },
        )
    }

    /// Shared by the column family constructors. `open` receives the path,
    /// the number of families, their names and options, the handle slots and
    /// the status.
    fn open_families(
        path: &Path,
        column_families: &[(&str, &Options)],
        open: impl FnOnce(
            *const c_char,
            c_int,
            *const *const c_char,
            *const *const ffi::rb_options_t,
            *mut *mut ffi::rb_column_family_handle_t,
            *mut ffi::rb_status_t,
        ) -> *mut ffi::rb_t,
    ) -> Result<(Self, Vec<ColumnFamilyHandle>)> {
        let name = path_cstring(path)?;
        let names = column_families
            .iter()
            .map(|(name, _)| cstring(name))
            .collect::<Result<Vec<CString>>>()?;
        let name_ptrs: Vec<_> = names.iter().map(|n| n.as_ptr()).collect();
        let option_ptrs: Vec<_> = column_families.iter().map(|(_, o)| o.as_ptr()).collect();
        let mut handles = vec![ptr::null_mut(); column_families.len()];
        let num = c_int::try_from(column_families.len())
            .map_err(|_| Error::InvalidArgument("too many column families".to_string()))?;

        let raw = with_status(|status| {
            open(
                name.as_ptr(),
                num,
                name_ptrs.as_ptr(),
                option_ptrs.as_ptr(),
                handles.as_mut_ptr(),
                status,
            )
        })?;
        let db = Self::from_raw(raw, path);
        let handles = handles
            .into_iter()
            .map(|h| ColumnFamilyHandle::new(h, Arc::clone(&db.inner)))
            .collect();
        Ok((db, handles))
    }

    fn from_raw(raw: *mut ffi::rb_t, path: &Path) -> Self {
        tracing::debug!(path = %path.display(), "opened database");
        Self {
            inner: Arc::new(DbInner {
                handle: Handle::owned(raw),
                path: path.to_path_buf(),
            }),
        }
    }

    /// Names of the column families of the database at `path`.
    pub fn list_column_families<P: AsRef<Path>>(options: &Options, path: P) -> Result<Vec<String>> {
        let name = path_cstring(path.as_ref())?;
        let mut len = 0;
        let list = with_status(|status| unsafe {
            ffi::rb_list_column_families(options.as_ptr(), name.as_ptr(), &mut len, status)
        })?;
        if list.is_null() {
            return Ok(Vec::new());
        }
        let names = unsafe { std::slice::from_raw_parts(list, len) }
            .iter()
            .map(|&n| unsafe { std::ffi::CStr::from_ptr(n) }.to_string_lossy().into_owned())
            .collect();
        unsafe { ffi::rb_list_column_families_destroy(list, len) };
        Ok(names)
    }

    /// Delete the database at `path`. It must not be open.
    pub fn destroy<P: AsRef<Path>>(options: &Options, path: P) -> Result<()> {
        let name = path_cstring(path.as_ref())?;
        with_status(|status| unsafe {
            ffi::rb_destroy_db(options.as_ptr(), name.as_ptr(), status)
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Close the database now instead of at drop. Children stay usable for
    /// release; calls on this database report an invalid argument.
    pub fn close(&self) {
        self.inner.handle.close();
    }

    fn raw(&self) -> Result<HandleGuard<'_, ffi::rb_t>> {
        self.inner.raw()
    }

    pub fn put(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_opt(options, None, key, value)
    }

    pub fn put_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.put_opt(options, Some(cf), key, value)
    }

    fn put_opt(
        &self,
        options: &WriteOptions,
        cf: Option<&ColumnFamilyHandle>,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        with_status(|status| unsafe {
            ffi::rb_put_cf(
                db.as_ptr(),
                options.as_ptr(),
                cf_ptr(&cf),
                as_c(key),
                key.len(),
                as_c(value),
                value.len(),
                status,
            )
        })
    }

    /// Record a merge operand for `key`, combined by the column family's
    /// merge operator on read and at compaction.
    pub fn merge(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        self.merge_opt(options, None, key, value)
    }

    pub fn merge_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.merge_opt(options, Some(cf), key, value)
    }

    fn merge_opt(
        &self,
        options: &WriteOptions,
        cf: Option<&ColumnFamilyHandle>,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        with_status(|status| unsafe {
            ffi::rb_merge_cf(
                db.as_ptr(),
                options.as_ptr(),
                cf_ptr(&cf),
                as_c(key),
                key.len(),
                as_c(value),
                value.len(),
                status,
            )
        })
    }

    pub fn delete(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        self.delete_opt(options, None, key)
    }

    pub fn delete_cf(
        &self,
        options: &WriteOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<()> {
        self.delete_opt(options, Some(cf), key)
    }

    fn delete_opt(
        &self,
        options: &WriteOptions,
        cf: Option<&ColumnFamilyHandle>,
        key: &[u8],
    ) -> Result<()> {
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        with_status(|status| unsafe {
            ffi::rb_delete_cf(
                db.as_ptr(),
                options.as_ptr(),
                cf_ptr(&cf),
                as_c(key),
                key.len(),
                status,
            )
        })
    }

    /// Apply every operation of `batch` atomically.
    pub fn write(&self, options: &WriteOptions, batch: &WriteBatch) -> Result<()> {
        let db = self.raw()?;
        batch.with_raw(|batch| {
            with_status(|status| unsafe {
                ffi::rb_write(db.as_ptr(), options.as_ptr(), batch, status)
            })
        })
    }

    /// The value of `key`, `None` when it does not exist.
    pub fn get(&self, options: &ReadOptions, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_opt(options, None, key)
    }

    pub fn get_cf(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.get_opt(options, Some(cf), key)
    }

    fn get_opt(
        &self,
        options: &ReadOptions,
        cf: Option<&ColumnFamilyHandle>,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        let mut len = 0;
        let result = with_status(|status| unsafe {
            ffi::rb_get_cf(
                db.as_ptr(),
                options.as_ptr(),
                cf_ptr(&cf),
                as_c(key),
                key.len(),
                &mut len,
                status,
            )
        })
        .map(|value| unsafe { take_bytes(value, len) });
        not_found_to_none(result)
    }

    /// Point lookups at one consistent sequence number, one result per key.
    /// The outer error reports a released database or column family handle.
    pub fn multi_get_cf(
        &self,
        options: &ReadOptions,
        keys: &[(&ColumnFamilyHandle, &[u8])],
    ) -> Result<Vec<Result<Option<Vec<u8>>>>> {
        let n = keys.len();
        let db = self.raw()?;
        let handles: Vec<&ColumnFamilyHandle> = keys.iter().map(|(cf, _)| *cf).collect();
        let (_held, cfs) = guard_all(&handles, ColumnFamilyHandle::raw)?;
        let key_ptrs: Vec<_> = keys.iter().map(|(_, k)| as_c(k)).collect();
        let key_lens: Vec<_> = keys.iter().map(|(_, k)| k.len()).collect();
        let mut values = vec![ptr::null_mut(); n];
        let mut value_lens = vec![0; n];
        let mut statuses: Vec<ffi::rb_status_t> = (0..n).map(|_| ffi::rb_status_t::ok()).collect();
        if n > 0 {
            unsafe {
                ffi::rb_multi_get_cf(
                    db.as_ptr(),
                    options.as_ptr(),
                    cfs.as_ptr(),
                    n,
                    key_ptrs.as_ptr(),
                    key_lens.as_ptr(),
                    values.as_mut_ptr(),
                    value_lens.as_mut_ptr(),
                    statuses.as_mut_ptr(),
                )
            };
        }
        Ok(values
            .into_iter()
            .zip(value_lens)
            .zip(statuses.iter_mut())
            .map(|((value, len), status)| {
                let value = unsafe { take_bytes(value, len) };
                let status = unsafe { ffi::decode_status(status) };
                not_found_to_none(status.into_result().map(|()| value))
            })
            .collect())
    }

    /// Cheap existence check. `false` means the key is definitely absent;
    /// the value is returned when it was found without extra work.
    pub fn key_may_exist_cf(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
        key: &[u8],
    ) -> Result<(bool, Option<Vec<u8>>)> {
        let (db, cf) = (self.raw()?, cf.raw()?);
        let mut value = ptr::null_mut();
        let mut len = 0;
        let mut found = 0;
        let may_exist = unsafe {
            ffi::rb_key_may_exist_cf(
                db.as_ptr(),
                options.as_ptr(),
                cf.as_ptr(),
                as_c(key),
                key.len(),
                &mut value,
                &mut len,
                &mut found,
            )
        };
        let value = unsafe { take_bytes(value, len) };
        Ok((may_exist != 0, (found != 0).then_some(value)))
    }

    pub fn iterator(&self, options: &ReadOptions) -> Result<DbIterator> {
        self.iterator_opt(options, None)
    }

    pub fn iterator_cf(
        &self,
        options: &ReadOptions,
        cf: &ColumnFamilyHandle,
    ) -> Result<DbIterator> {
        self.iterator_opt(options, Some(cf))
    }

    fn iterator_opt(
        &self,
        options: &ReadOptions,
        cf: Option<&ColumnFamilyHandle>,
    ) -> Result<DbIterator> {
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        let raw = unsafe {
            ffi::rb_create_iterator_cf(db.as_ptr(), options.as_ptr(), cf_ptr(&cf))
        };
        if raw.is_null() {
            return Err(Status::invalid_argument("database is closed").into());
        }
        let iter = DbIterator::new(raw, Arc::clone(&self.inner));
        iter.status()?;
        Ok(iter)
    }

    /// One iterator per column family, all reading at the same sequence
    /// number.
    pub fn iterators(
        &self,
        options: &ReadOptions,
        cfs: &[&ColumnFamilyHandle],
    ) -> Result<Vec<DbIterator>> {
        let db = self.raw()?;
        let (_held, cf_ptrs) = guard_all(cfs, ColumnFamilyHandle::raw)?;
        let mut raw = vec![ptr::null_mut(); cfs.len()];
        with_status(|status| unsafe {
            ffi::rb_create_iterators(
                db.as_ptr(),
                options.as_ptr(),
                cf_ptrs.as_ptr(),
                cfs.len(),
                raw.as_mut_ptr(),
                status,
            )
        })?;
        let iters: Vec<DbIterator> = raw
            .into_iter()
            .map(|it| DbIterator::new(it, Arc::clone(&self.inner)))
            .collect();
        for iter in &iters {
            iter.status()?;
        }
        Ok(iters)
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        let db = self.raw()?;
        let raw = unsafe { ffi::rb_create_snapshot(db.as_ptr()) };
        if raw.is_null() {
            return Err(Status::invalid_argument("cannot take a snapshot").into());
        }
        Ok(Snapshot::new(raw, Arc::clone(&self.inner)))
    }

    fn assert_parent(&self, parent: &Arc<DbInner>, child: &str) {
        assert!(
            Arc::ptr_eq(parent, &self.inner),
            "{} released through a database it was not created from ({} != {})",
            child,
            parent.path.display(),
            self.inner.path.display(),
        );
    }

    /// Release a snapshot taken from this database.
    ///
    /// # Panics
    /// If the snapshot belongs to another database.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        self.assert_parent(&snapshot.parent, "snapshot");
        snapshot.close();
    }

    /// Release an iterator created from this database.
    ///
    /// # Panics
    /// If the iterator belongs to another database.
    pub fn release_iterator(&self, iter: DbIterator) {
        self.assert_parent(&iter.parent, "iterator");
        iter.close();
    }

    /// Release a column family handle obtained from this database.
    ///
    /// # Panics
    /// If the handle belongs to another database.
    pub fn destroy_column_family_handle(&self, cf: ColumnFamilyHandle) {
        self.assert_parent(&cf.parent, "column family handle");
        cf.close();
    }

    pub fn create_column_family(
        &self,
        options: &Options,
        name: &str,
    ) -> Result<ColumnFamilyHandle> {
        let cname = cstring(name)?;
        let db = self.raw()?;
        let raw = with_status(|status| unsafe {
            ffi::rb_create_column_family(db.as_ptr(), options.as_ptr(), cname.as_ptr(), status)
        })?;
        tracing::info!(column_family = name, "created column family");
        Ok(ColumnFamilyHandle::new(raw, Arc::clone(&self.inner)))
    }

    /// Drop a column family. The handle must still be released afterwards.
    pub fn drop_column_family(&self, cf: &ColumnFamilyHandle) -> Result<()> {
        let (db, cf) = (self.raw()?, cf.raw()?);
        with_status(|status| unsafe {
            ffi::rb_drop_column_family(db.as_ptr(), cf.as_ptr(), status)
        })
    }

    pub fn default_column_family(&self) -> Result<ColumnFamilyHandle> {
        let db = self.raw()?;
        let raw = unsafe { ffi::rb_get_default_column_family_handle(db.as_ptr()) };
        if raw.is_null() {
            return Err(Status::invalid_argument("no default column family").into());
        }
        Ok(ColumnFamilyHandle::new(raw, Arc::clone(&self.inner)))
    }

    /// Write the memtable of the default column family to an immutable
    /// table.
    pub fn flush(&self, options: &FlushOptions) -> Result<()> {
        self.flush_opt(options, None)
    }

    pub fn flush_cf(&self, options: &FlushOptions, cf: &ColumnFamilyHandle) -> Result<()> {
        self.flush_opt(options, Some(cf))
    }

    fn flush_opt(&self, options: &FlushOptions, cf: Option<&ColumnFamilyHandle>) -> Result<()> {
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        with_status(|status| unsafe {
            ffi::rb_flush_cf(db.as_ptr(), options.as_ptr(), cf_ptr(&cf), status)
        })
    }

    /// Compact the keys in `[start, limit)` of the default column family.
    /// `None` leaves that end open; both `None` is a full compaction.
    pub fn compact_range(&self, start: Option<&[u8]>, limit: Option<&[u8]>) -> Result<()> {
        self.compact_range_opt(None, start, limit)
    }

    pub fn compact_range_cf(
        &self,
        cf: &ColumnFamilyHandle,
        start: Option<&[u8]>,
        limit: Option<&[u8]>,
    ) -> Result<()> {
        self.compact_range_opt(Some(cf), start, limit)
    }

    fn compact_range_opt(
        &self,
        cf: Option<&ColumnFamilyHandle>,
        start: Option<&[u8]>,
        limit: Option<&[u8]>,
    ) -> Result<()> {
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        let ((start, start_len), (limit, limit_len)) = (opt_c(start), opt_c(limit));
        with_status(|status| unsafe {
            ffi::rb_compact_range_cf(
                db.as_ptr(),
                cf_ptr(&cf),
                start,
                start_len,
                limit,
                limit_len,
                status,
            )
        })
    }

    /// Approximate table bytes of the default column family in each
    /// `[start, limit)` range. Writes still in the memtable are not counted.
    pub fn approximate_sizes(&self, ranges: &[(&[u8], &[u8])]) -> Result<Vec<u64>> {
        self.approximate_sizes_opt(None, ranges)
    }

    pub fn approximate_sizes_cf(
        &self,
        cf: &ColumnFamilyHandle,
        ranges: &[(&[u8], &[u8])],
    ) -> Result<Vec<u64>> {
        self.approximate_sizes_opt(Some(cf), ranges)
    }

    fn approximate_sizes_opt(
        &self,
        cf: Option<&ColumnFamilyHandle>,
        ranges: &[(&[u8], &[u8])],
    ) -> Result<Vec<u64>> {
        let num = c_int::try_from(ranges.len())
            .map_err(|_| Error::InvalidArgument("too many ranges".to_string()))?;
        let (db, cf) = (self.raw()?, cf_guard(cf)?);
        let starts: Vec<_> = ranges.iter().map(|(start, _)| as_c(start)).collect();
        let limits: Vec<_> = ranges.iter().map(|(_, limit)| as_c(limit)).collect();
        let start_lens: Vec<_> = ranges.iter().map(|(start, _)| start.len()).collect();
        let limit_lens: Vec<_> = ranges.iter().map(|(_, limit)| limit.len()).collect();
        let mut sizes = vec![0; ranges.len()];
        with_status(|status| unsafe {
            ffi::rb_approximate_sizes_cf(
                db.as_ptr(),
                cf_ptr(&cf),
                num,
                starts.as_ptr(),
                start_lens.as_ptr(),
                limits.as_ptr(),
                limit_lens.as_ptr(),
                sizes.as_mut_ptr(),
                status,
            )
        })?;
        Ok(sizes)
    }

    /// The logged write batches from the one holding `sequence` onwards.
    ///
    /// Fails with `NotFound` when `sequence` is newer than every write, or
    /// when the log no longer reaches back to it.
    pub fn updates_since(&self, sequence: u64) -> Result<TransactionLogIterator> {
        let db = self.raw()?;
        let raw = with_status(|status| unsafe {
            ffi::rb_get_updates_since(db.as_ptr(), sequence, status)
        })?;
        Ok(TransactionLogIterator::new(raw))
    }

    /// A database property such as [`ffi::properties::NUM_SNAPSHOTS`].
    pub fn property_value(&self, name: &str) -> Option<String> {
        self.property_value_opt(None, name)
    }

    pub fn property_value_cf(&self, cf: &ColumnFamilyHandle, name: &str) -> Option<String> {
        self.property_value_opt(Some(cf), name)
    }

    fn property_value_opt(&self, cf: Option<&ColumnFamilyHandle>, name: &str) -> Option<String> {
        let name = cstring(name).ok()?;
        let (db, cf) = (self.raw().ok()?, cf_guard(cf).ok()?);
        unsafe {
            take_string(ffi::rb_property_value_cf(db.as_ptr(), cf_ptr(&cf), name.as_ptr()))
        }
    }

    /// Like [`DB::property_value`], parsed as an integer.
    pub fn property_int_value(&self, name: &str) -> Option<u64> {
        self.property_value(name)?.parse().ok()
    }

    /// The sequence number of the last write, 0 once closed.
    pub fn latest_sequence_number(&self) -> u64 {
        let db = self.inner.handle.get();
        unsafe { ffi::rb_get_latest_sequence_number(db.as_ptr()) }
    }
}

impl fmt::Debug for DB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DB").field("path", &self.inner.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DB {
        let mut opts = Options::new();
        opts.set_create_if_missing(true);
        DB::open(&opts, dir.path()).unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let (w, r) = (WriteOptions::new(), ReadOptions::new());

        db.put(&w, b"key", b"value").unwrap();
        assert_eq!(db.get(&r, b"key").unwrap(), Some(b"value".to_vec()));
        db.delete(&w, b"key").unwrap();
        assert_eq!(db.get(&r, b"key").unwrap(), None);
        assert!(db.latest_sequence_number() >= 2);
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = DB::open(&Options::new(), dir.path().join("absent")).unwrap_err();
        assert!(err.status().unwrap().is_invalid_argument());
    }

    #[test]
    fn test_interior_nul_in_path() {
        let err = DB::open(&Options::new(), "bad\0path").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_calls_after_close_are_invalid_arguments() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.close();
        db.close();
        let err = db.put(&WriteOptions::new(), b"k", b"v").unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: database is released");
        assert!(db.snapshot().is_err());
        assert!(db.property_value(ffi::properties::NUM_SNAPSHOTS).is_none());
        assert_eq!(db.latest_sequence_number(), 0);
    }

    #[test]
    fn test_close_waits_for_writers() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(open(&dir));
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    let w = WriteOptions::new();
                    let mut written = 0;
                    for i in 0..500 {
                        let key = format!("{}-{}", t, i);
                        match db.put(&w, key.as_bytes(), b"v") {
                            Ok(()) => written += 1,
                            Err(e) => {
                                assert!(matches!(e, Error::InvalidArgument(_)));
                                break;
                            }
                        }
                    }
                    written
                })
            })
            .collect();
        thread::sleep(std::time::Duration::from_millis(5));
        db.close();
        for writer in writers {
            writer.join().unwrap();
        }
        assert!(db.get(&ReadOptions::new(), b"0-0").is_err());
    }

    #[test]
    fn test_released_column_family_is_not_the_default() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let (w, r) = (WriteOptions::new(), ReadOptions::new());
        let other = db.create_column_family(&Options::new(), "other").unwrap();
        other.close();

        let err = db.put_cf(&w, &other, b"k", b"v").unwrap_err();
        assert_eq!(err.to_string(), "Invalid argument: column family handle is released");
        assert!(db.get_cf(&r, &other, b"k").is_err());
        assert!(db.delete_cf(&w, &other, b"k").is_err());
        assert!(db.iterator_cf(&r, &other).is_err());
        assert!(db.flush_cf(&FlushOptions::new(), &other).is_err());
        assert!(db.key_may_exist_cf(&r, &other, b"k").is_err());
        assert!(db.multi_get_cf(&r, &[(&other, &b"k"[..])]).is_err());
        assert_eq!(db.get(&r, b"k").unwrap(), None);
        assert_eq!(other.name(), "other");
    }

    #[test]
    fn test_multi_get_mixes_hits_and_misses() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.put(&WriteOptions::new(), b"a", b"1").unwrap();
        let cf = db.default_column_family().unwrap();

        let keys = [(&cf, &b"a"[..]), (&cf, &b"b"[..])];
        let results = db.multi_get_cf(&ReadOptions::new(), &keys).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &Some(b"1".to_vec()));
        assert_eq!(results[1].as_ref().unwrap(), &None);
        assert_eq!(cf.name(), ffi::DEFAULT_COLUMN_FAMILY_NAME);
    }

    #[test]
    fn test_iterators_share_one_view() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let w = WriteOptions::new();
        let other = db.create_column_family(&Options::new(), "other").unwrap();
        let default = db.default_column_family().unwrap();
        db.put(&w, b"a", b"1").unwrap();
        db.put_cf(&w, &other, b"b", b"2").unwrap();

        let iters = db.iterators(&ReadOptions::new(), &[&default, &other, &default]).unwrap();
        db.put(&w, b"late", b"3").unwrap();
        let entries: Vec<_> = iters.iter().map(DbIterator::entries).collect();
        assert_eq!(entries[0], vec![(b"a".to_vec(), b"1".to_vec())]);
        assert_eq!(entries[1], vec![(b"b".to_vec(), b"2".to_vec())]);
        assert_eq!(entries[2], entries[0]);
    }

    #[test]
    fn test_approximate_sizes_after_flush() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let w = WriteOptions::new();
        for i in 0..20u8 {
            db.put(&w, &[b'a', i], &[0; 64]).unwrap();
        }
        let ranges: [(&[u8], &[u8]); 2] = [(b"a", b"b"), (b"x", b"y")];
        assert_eq!(db.approximate_sizes(&ranges).unwrap(), vec![0, 0]);

        db.flush(&FlushOptions::new()).unwrap();
        let sizes = db.approximate_sizes(&ranges).unwrap();
        assert!(sizes[0] >= 20 * 64);
        assert_eq!(sizes[1], 0);
    }
}
