//! Database entry points of the C surface.
//!
//! Every fallible function takes a trailing `rb_status_t *` out-parameter.
//! Buffers handed to the caller (values, names, property strings) are
//! `malloc`'d and released with [`rb_free`]. A null column family handle
//! means the default column family.

use crate::db::{ColumnFamily, Db};
use crate::iterator::rb_iterator_t;
use crate::options::{
    rb_flushoptions_t, rb_options_t, rb_readoptions_t, rb_writeoptions_t, Options,
    ReadOptions, WriteOptions,
};
use crate::raw::{
    byte_arrays, bytes, c_str, malloc_bytes, malloc_cstring, report, set_status, rb_status_t,
};
use crate::snapshot::rb_snapshot_t;
use crate::transaction_log::rb_wal_iterator_t;
use crate::write_batch::rb_writebatch_t;
use libc::{c_char, c_int, c_uchar, c_void, size_t};
use rockbind_core::{Error, Result, Status};
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

pub struct rb_t {
    pub(crate) inner: Db,
}

pub struct rb_column_family_handle_t {
    pub(crate) inner: Arc<ColumnFamily>,
}

unsafe fn database<'a>(db: *const rb_t) -> Result<&'a Db> {
    db.as_ref()
        .map(|db| &db.inner)
        .ok_or_else(|| Error::InvalidArgument("null database".to_string()))
}

/// The handle's column family, or the default one for a null handle.
unsafe fn column_family(
    db: &Db,
    cf: *const rb_column_family_handle_t,
) -> Result<Arc<ColumnFamily>> {
    match cf.as_ref() {
        Some(handle) => Ok(Arc::clone(&handle.inner)),
        None => db.default_column_family(),
    }
}

unsafe fn path_of(name: *const c_char) -> Result<PathBuf> {
    c_str(name).map(PathBuf::from)
}

unsafe fn db_options(options: *const rb_options_t) -> Options {
    options.as_ref().map(|o| o.inner.clone()).unwrap_or_default()
}

unsafe fn read_options(options: *const rb_readoptions_t) -> ReadOptions {
    options.as_ref().map(|o| o.inner.clone()).unwrap_or_default()
}

unsafe fn write_options(options: *const rb_writeoptions_t) -> WriteOptions {
    options.as_ref().map(|o| o.inner).unwrap_or_default()
}

fn into_raw_db(db: Db) -> *mut rb_t {
    Box::into_raw(Box::new(rb_t { inner: db }))
}

fn into_raw_handle(cf: Arc<ColumnFamily>) -> *mut rb_column_family_handle_t {
    Box::into_raw(Box::new(rb_column_family_handle_t { inner: cf }))
}

/// Free a buffer returned by this library.
///
/// # Safety
/// `ptr` must be null or a buffer returned by an `rb_*` function.
#[no_mangle]
pub unsafe extern "C" fn rb_free(ptr: *mut c_void) {
    libc::free(ptr);
}

/// # Safety
/// `name` must be a NUL-terminated path; `status` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_open(
    options: *const rb_options_t,
    name: *const c_char,
    status: *mut rb_status_t,
) -> *mut rb_t {
    let result = path_of(name).and_then(|path| Db::open(&db_options(options), &path));
    report(status, result).map_or(ptr::null_mut(), into_raw_db)
}

/// Open with the listed column families; one handle per name is written to
/// `handles`.
///
/// # Safety
/// `names`, `cf_options` and `handles` must hold `num_column_families`
/// elements.
#[no_mangle]
pub unsafe extern "C" fn rb_open_column_families(
    options: *const rb_options_t,
    name: *const c_char,
    num_column_families: c_int,
    names: *const *const c_char,
    cf_options: *const *const rb_options_t,
    handles: *mut *mut rb_column_family_handle_t,
    status: *mut rb_status_t,
) -> *mut rb_t {
    let result = (|| {
        let path = path_of(name)?;
        let descriptors =
            descriptors(num_column_families, names, cf_options, handles.is_null())?;
        Db::open_column_families(&db_options(options), &path, &descriptors)
    })();
    hand_out(report(status, result), handles)
}

/// Name and options of each column family to open.
unsafe fn descriptors(
    num_column_families: c_int,
    names: *const *const c_char,
    cf_options: *const *const rb_options_t,
    no_handles: bool,
) -> Result<Vec<(String, Options)>> {
    let n = num_column_families.max(0) as usize;
    if n > 0 && (names.is_null() || cf_options.is_null() || no_handles) {
        return Err(Error::InvalidArgument("null column family arrays".to_string()));
    }
    let mut descriptors = Vec::with_capacity(n);
    for i in 0..n {
        let cf_name = c_str(*names.add(i))?.to_string();
        descriptors.push((cf_name, db_options(*cf_options.add(i))));
    }
    Ok(descriptors)
}

/// Write one handle per opened column family, returning the database.
unsafe fn hand_out(
    opened: Option<(Db, Vec<Arc<ColumnFamily>>)>,
    handles: *mut *mut rb_column_family_handle_t,
) -> *mut rb_t {
    match opened {
        Some((db, cfs)) => {
            for (i, cf) in cfs.into_iter().enumerate() {
                *handles.add(i) = into_raw_handle(cf);
            }
            into_raw_db(db)
        }
        None => ptr::null_mut(),
    }
}

/// Open without write access; see [`Db::open_for_read_only`].
///
/// # Safety
/// `name` must be a NUL-terminated path; `status` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_open_for_read_only(
    options: *const rb_options_t,
    name: *const c_char,
    error_if_log_file_exist: c_uchar,
    status: *mut rb_status_t,
) -> *mut rb_t {
    let result = path_of(name).and_then(|path| {
        Db::open_for_read_only(&db_options(options), &path, error_if_log_file_exist != 0)
    });
    report(status, result).map_or(ptr::null_mut(), into_raw_db)
}

/// Open some column families without write access. Unlike
/// [`rb_open_column_families`], the list may leave column families out.
///
/// # Safety
/// Same as [`rb_open_column_families`].
#[no_mangle]
pub unsafe extern "C" fn rb_open_for_read_only_column_families(
    options: *const rb_options_t,
    name: *const c_char,
    num_column_families: c_int,
    names: *const *const c_char,
    cf_options: *const *const rb_options_t,
    handles: *mut *mut rb_column_family_handle_t,
    error_if_log_file_exist: c_uchar,
    status: *mut rb_status_t,
) -> *mut rb_t {
    let result = (|| {
        let path = path_of(name)?;
        let descriptors =
            descriptors(num_column_families, names, cf_options, handles.is_null())?;
        Db::open_for_read_only_column_families(
            &db_options(options),
            &path,
            &descriptors,
            error_if_log_file_exist != 0,
        )
    })();
    hand_out(report(status, result), handles)
}

/// Column family names of the database at `name`, as a `malloc`'d array of
/// `malloc`'d strings. Release with [`rb_list_column_families_destroy`].
///
/// # Safety
/// `name` must be a NUL-terminated path; `len` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_list_column_families(
    _options: *const rb_options_t,
    name: *const c_char,
    len: *mut size_t,
    status: *mut rb_status_t,
) -> *mut *mut c_char {
    let result = path_of(name).and_then(|path| Db::list_column_families(&path));
    let Some(names) = report(status, result) else {
        return ptr::null_mut();
    };
    let size = names.len().max(1) * std::mem::size_of::<*mut c_char>();
    let list = libc::malloc(size) as *mut *mut c_char;
    if list.is_null() {
        set_status(status, &Status::io_error("out of memory"));
        return ptr::null_mut();
    }
    for (i, cf_name) in names.iter().enumerate() {
        *list.add(i) = malloc_cstring(cf_name);
    }
    if !len.is_null() {
        *len = names.len();
    }
    list
}

/// # Safety
/// `list` must come from [`rb_list_column_families`] with this `len`.
#[no_mangle]
pub unsafe extern "C" fn rb_list_column_families_destroy(list: *mut *mut c_char, len: size_t) {
    if list.is_null() {
        return;
    }
    for i in 0..len {
        libc::free(*list.add(i) as *mut c_void);
    }
    libc::free(list as *mut c_void);
}

/// # Safety
/// `name` must be a NUL-terminated path.
#[no_mangle]
pub unsafe extern "C" fn rb_destroy_db(
    _options: *const rb_options_t,
    name: *const c_char,
    status: *mut rb_status_t,
) {
    report(status, path_of(name).and_then(|path| Db::destroy(&path)));
}

/// Close the database. Iterators, snapshots and column family handles
/// created from it stay valid until destroyed.
///
/// # Safety
/// `db` must come from an open function and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn rb_close(db: *mut rb_t) {
    if !db.is_null() {
        drop(Box::from_raw(db));
    }
}

/// # Safety
/// `db` must be live; buffers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn rb_put(
    db: *mut rb_t,
    options: *const rb_writeoptions_t,
    key: *const c_char,
    key_len: size_t,
    value: *const c_char,
    value_len: size_t,
    status: *mut rb_status_t,
) {
    rb_put_cf(db, options, ptr::null(), key, key_len, value, value_len, status)
}

/// # Safety
/// `db` and `cf` must be live; buffers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn rb_put_cf(
    db: *mut rb_t,
    options: *const rb_writeoptions_t,
    cf: *const rb_column_family_handle_t,
    key: *const c_char,
    key_len: size_t,
    value: *const c_char,
    value_len: size_t,
    status: *mut rb_status_t,
) {
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.put(&write_options(options), &cf, bytes(key, key_len), bytes(value, value_len))
    });
    report(status, result);
}

/// # Safety
/// `db` must be live; buffers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn rb_merge(
    db: *mut rb_t,
    options: *const rb_writeoptions_t,
    key: *const c_char,
    key_len: size_t,
    value: *const c_char,
    value_len: size_t,
    status: *mut rb_status_t,
) {
    rb_merge_cf(db, options, ptr::null(), key, key_len, value, value_len, status)
}

/// # Safety
/// `db` and `cf` must be live; buffers must be valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn rb_merge_cf(
    db: *mut rb_t,
    options: *const rb_writeoptions_t,
    cf: *const rb_column_family_handle_t,
    key: *const c_char,
    key_len: size_t,
    value: *const c_char,
    value_len: size_t,
    status: *mut rb_status_t,
) {
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.merge(&write_options(options), &cf, bytes(key, key_len), bytes(value, value_len))
    });
    report(status, result);
}

/// # Safety
/// `db` must be live; `key` must be valid for `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rb_delete(
    db: *mut rb_t,
    options: *const rb_writeoptions_t,
    key: *const c_char,
    key_len: size_t,
    status: *mut rb_status_t,
) {
    rb_delete_cf(db, options, ptr::null(), key, key_len, status)
}

/// # Safety
/// `db` and `cf` must be live; `key` must be valid for `key_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn rb_delete_cf(
    db: *mut rb_t,
    options: *const rb_writeoptions_t,
    cf: *const rb_column_family_handle_t,
    key: *const c_char,
    key_len: size_t,
    status: *mut rb_status_t,
) {
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.delete(&write_options(options), &cf, bytes(key, key_len))
    });
    report(status, result);
}

/// # Safety
/// `db` and `batch` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_write(
    db: *mut rb_t,
    options: *const rb_writeoptions_t,
    batch: *const rb_writebatch_t,
    status: *mut rb_status_t,
) {
    let result = database(db).and_then(|db| match batch.as_ref() {
        Some(batch) => db.write(&write_options(options), &batch.inner),
        None => Err(Error::InvalidArgument("null write batch".to_string())),
    });
    report(status, result);
}

/// Value of `key` as a `malloc`'d buffer, or null with a NotFound status.
///
/// # Safety
/// `db` must be live; `key` must be valid for `key_len` bytes; `value_len`
/// must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_get(
    db: *mut rb_t,
    options: *const rb_readoptions_t,
    key: *const c_char,
    key_len: size_t,
    value_len: *mut size_t,
    status: *mut rb_status_t,
) -> *mut c_char {
    rb_get_cf(db, options, ptr::null(), key, key_len, value_len, status)
}

/// # Safety
/// Same as [`rb_get`]; `cf` must be live or null.
#[no_mangle]
pub unsafe extern "C" fn rb_get_cf(
    db: *mut rb_t,
    options: *const rb_readoptions_t,
    cf: *const rb_column_family_handle_t,
    key: *const c_char,
    key_len: size_t,
    value_len: *mut size_t,
    status: *mut rb_status_t,
) -> *mut c_char {
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.get(&read_options(options), &cf, bytes(key, key_len))
    });
    write_value(result, value_len, status)
}

unsafe fn write_value(
    result: Result<Option<Vec<u8>>>,
    value_len: *mut size_t,
    status: *mut rb_status_t,
) -> *mut c_char {
    if !value_len.is_null() {
        *value_len = 0;
    }
    match report(status, result) {
        Some(Some(value)) => {
            if !value_len.is_null() {
                *value_len = value.len();
            }
            malloc_bytes(&value)
        }
        Some(None) => {
            set_status(status, &Status::not_found(""));
            ptr::null_mut()
        }
        None => ptr::null_mut(),
    }
}

/// Batched point lookups at one sequence number. Every slot of `values`,
/// `value_lens` and `statuses` is written.
///
/// # Safety
/// All arrays must hold `num_keys` elements; every handle must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_multi_get_cf(
    db: *mut rb_t,
    options: *const rb_readoptions_t,
    cfs: *const *const rb_column_family_handle_t,
    num_keys: size_t,
    keys: *const *const c_char,
    key_lens: *const size_t,
    values: *mut *mut c_char,
    value_lens: *mut size_t,
    statuses: *mut rb_status_t,
) {
    if num_keys == 0
        || cfs.is_null()
        || values.is_null()
        || value_lens.is_null()
        || statuses.is_null()
    {
        return;
    }
    let keys = byte_arrays(keys, key_lens, num_keys);
    let handles = std::slice::from_raw_parts(cfs, num_keys);

    let resolved: Result<Vec<Arc<ColumnFamily>>> = database(db).and_then(|db| {
        handles
            .iter()
            .map(|&cf| column_family(db, cf))
            .collect::<Result<Vec<_>>>()
    });

    let results: Vec<Result<Option<Vec<u8>>>> = match (database(db), resolved) {
        (Ok(db), Ok(cfs)) if keys.len() == num_keys => {
            let requests: Vec<(&ColumnFamily, &[u8])> =
                cfs.iter().map(|cf| cf.as_ref()).zip(keys.iter().copied()).collect();
            db.multi_get(&read_options(options), &requests)
        }
        (Err(e), _) | (_, Err(e)) => {
            let status = crate::raw::status_of(e);
            (0..num_keys).map(|_| Err(status.clone().into())).collect()
        }
        _ => (0..num_keys)
            .map(|_| Err(Error::InvalidArgument("null key array".to_string())))
            .collect(),
    };

    for (i, result) in results.into_iter().enumerate() {
        *values.add(i) = write_value(result, value_lens.add(i), statuses.add(i));
    }
}

/// `0` only if `key` certainly does not exist. When the value was found
/// cheaply it is returned through `value` and `value_found` is set.
///
/// # Safety
/// `db` must be live; out-parameters must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_key_may_exist_cf(
    db: *mut rb_t,
    options: *const rb_readoptions_t,
    cf: *const rb_column_family_handle_t,
    key: *const c_char,
    key_len: size_t,
    value: *mut *mut c_char,
    value_len: *mut size_t,
    value_found: *mut c_uchar,
) -> c_uchar {
    if !value_found.is_null() {
        *value_found = 0;
    }
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.key_may_exist(&read_options(options), &cf, bytes(key, key_len))
    });
    match result {
        Ok((may_exist, found)) => {
            if let Some(found) = found {
                if !value.is_null() {
                    *value = malloc_bytes(&found);
                    if !value_len.is_null() {
                        *value_len = found.len();
                    }
                    if !value_found.is_null() {
                        *value_found = 1;
                    }
                }
            }
            may_exist as c_uchar
        }
        Err(e) => {
            tracing::debug!(error = %e, "key_may_exist failed, answering maybe");
            1
        }
    }
}

/// # Safety
/// `db` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_create_iterator(
    db: *mut rb_t,
    options: *const rb_readoptions_t,
) -> *mut rb_iterator_t {
    rb_create_iterator_cf(db, options, ptr::null())
}

/// Null only for a null database. Errors building the view are reported by
/// [`crate::iterator::rb_iter_get_status`].
///
/// # Safety
/// `db` must be live; `cf` must be live or null.
#[no_mangle]
pub unsafe extern "C" fn rb_create_iterator_cf(
    db: *mut rb_t,
    options: *const rb_readoptions_t,
    cf: *const rb_column_family_handle_t,
) -> *mut rb_iterator_t {
    let Ok(db) = database(db) else {
        return ptr::null_mut();
    };
    let options = read_options(options);
    let iter = match column_family(db, cf) {
        Ok(cf) => {
            let entries = db.scan(&options, &cf);
            iterator_over(&options, &cf, entries)
        }
        Err(e) => failed_iterator(&options, e),
    };
    Box::into_raw(Box::new(iter))
}

fn iterator_over(
    options: &ReadOptions,
    cf: &ColumnFamily,
    entries: Result<Vec<(Vec<u8>, Vec<u8>)>>,
) -> rb_iterator_t {
    rb_iterator_t::new(
        options,
        Arc::clone(&cf.options().comparator),
        cf.options().prefix_extractor.clone(),
        entries,
    )
}

fn failed_iterator(options: &ReadOptions, err: Error) -> rb_iterator_t {
    rb_iterator_t::new(options, Arc::new(rockbind_core::BytewiseComparator), None, Err(err))
}

/// One iterator per column family, all reading at the same sequence number.
/// Every slot of `iterators` is written, or none when `status` reports an
/// error.
///
/// # Safety
/// `db` must be live; `cfs` and `iterators` must hold `num_column_families`
/// elements; every handle must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_create_iterators(
    db: *mut rb_t,
    options: *const rb_readoptions_t,
    cfs: *const *const rb_column_family_handle_t,
    num_column_families: size_t,
    iterators: *mut *mut rb_iterator_t,
    status: *mut rb_status_t,
) {
    let options = read_options(options);
    let result = database(db).and_then(|db| {
        if num_column_families > 0 && (cfs.is_null() || iterators.is_null()) {
            return Err(Error::InvalidArgument("null column family arrays".to_string()));
        }
        let handles = if num_column_families == 0 {
            &[][..]
        } else {
            std::slice::from_raw_parts(cfs, num_column_families)
        };
        let cfs = handles
            .iter()
            .map(|&cf| column_family(db, cf))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&ColumnFamily> = cfs.iter().map(|cf| cf.as_ref()).collect();
        let views = db.scan_many(&options, &refs);
        Ok(cfs
            .iter()
            .zip(views)
            .map(|(cf, entries)| iterator_over(&options, cf, entries))
            .collect::<Vec<_>>())
    });
    if let Some(iters) = report(status, result) {
        for (i, iter) in iters.into_iter().enumerate() {
            *iterators.add(i) = Box::into_raw(Box::new(iter));
        }
    }
}

/// Approximate table bytes for each `[start, limit)` range, written to
/// `sizes`. Writes still in the memtable are not counted.
///
/// # Safety
/// `db` must be live; `cf` must be live or null; every range array and
/// `sizes` must hold `num_ranges` elements.
#[no_mangle]
pub unsafe extern "C" fn rb_approximate_sizes_cf(
    db: *mut rb_t,
    cf: *const rb_column_family_handle_t,
    num_ranges: c_int,
    range_start: *const *const c_char,
    range_start_lens: *const size_t,
    range_limit: *const *const c_char,
    range_limit_lens: *const size_t,
    sizes: *mut u64,
    status: *mut rb_status_t,
) {
    let n = num_ranges.max(0) as usize;
    let starts = byte_arrays(range_start, range_start_lens, n);
    let limits = byte_arrays(range_limit, range_limit_lens, n);
    let result = database(db).and_then(|db| {
        if starts.len() != n || limits.len() != n || (n > 0 && sizes.is_null()) {
            return Err(Error::InvalidArgument("null range arrays".to_string()));
        }
        let cf = column_family(db, cf)?;
        let ranges: Vec<(&[u8], &[u8])> =
            starts.iter().copied().zip(limits.iter().copied()).collect();
        db.approximate_sizes(&cf, &ranges)
    });
    if let Some(computed) = report(status, result) {
        for (i, size) in computed.into_iter().enumerate() {
            *sizes.add(i) = size;
        }
    }
}

/// Iterator over logged write batches from the one holding `seq_number` on.
/// Null with an error status when that part of the log is gone.
///
/// # Safety
/// `db` must be live; `status` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn rb_get_updates_since(
    db: *mut rb_t,
    seq_number: u64,
    status: *mut rb_status_t,
) -> *mut rb_wal_iterator_t {
    let result = database(db).and_then(|db| db.updates_since(seq_number));
    report(status, result).map_or(ptr::null_mut(), |batches| {
        Box::into_raw(Box::new(rb_wal_iterator_t::new(Ok(batches))))
    })
}

/// # Safety
/// `db` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_create_snapshot(db: *mut rb_t) -> *mut rb_snapshot_t {
    match database(db).and_then(Db::snapshot) {
        Ok(snapshot) => Box::into_raw(Box::new(snapshot)),
        Err(e) => {
            tracing::error!(error = %e, "failed to create snapshot");
            ptr::null_mut()
        }
    }
}

/// Release a snapshot. `db` may be null once the database is closed; when
/// given, it must be the database the snapshot was taken from.
///
/// # Safety
/// `snapshot` must come from [`rb_create_snapshot`] and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn rb_release_snapshot(db: *mut rb_t, snapshot: *mut rb_snapshot_t) {
    if snapshot.is_null() {
        return;
    }
    let snapshot = Box::from_raw(snapshot);
    if let Ok(db) = database(db) {
        if !db.owns_snapshot(&snapshot) {
            tracing::error!(
                sequence = snapshot.sequence(),
                "snapshot released through another database"
            );
        }
    }
    drop(snapshot);
}

/// # Safety
/// `db` must be live; `name` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn rb_create_column_family(
    db: *mut rb_t,
    options: *const rb_options_t,
    name: *const c_char,
    status: *mut rb_status_t,
) -> *mut rb_column_family_handle_t {
    let result = database(db)
        .and_then(|db| db.create_column_family(&db_options(options), c_str(name)?));
    report(status, result).map_or(ptr::null_mut(), into_raw_handle)
}

/// # Safety
/// `db` and `handle` must be live. The handle stays valid until destroyed.
#[no_mangle]
pub unsafe extern "C" fn rb_drop_column_family(
    db: *mut rb_t,
    handle: *const rb_column_family_handle_t,
    status: *mut rb_status_t,
) {
    let result = database(db).and_then(|db| match handle.as_ref() {
        Some(handle) => db.drop_column_family(&handle.inner),
        None => Err(Error::InvalidArgument("null column family handle".to_string())),
    });
    report(status, result);
}

/// # Safety
/// `db` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_get_default_column_family_handle(
    db: *mut rb_t,
) -> *mut rb_column_family_handle_t {
    database(db)
        .and_then(Db::default_column_family)
        .map_or(ptr::null_mut(), into_raw_handle)
}

/// # Safety
/// `handle` must come from this library and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn rb_column_family_handle_destroy(handle: *mut rb_column_family_handle_t) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// # Safety
/// `handle` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_column_family_handle_get_id(
    handle: *const rb_column_family_handle_t,
) -> u32 {
    handle.as_ref().map_or(0, |h| h.inner.id())
}

/// Name as a `malloc`'d NUL-terminated string.
///
/// # Safety
/// `handle` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_column_family_handle_get_name(
    handle: *const rb_column_family_handle_t,
) -> *mut c_char {
    handle
        .as_ref()
        .map_or(ptr::null_mut(), |h| malloc_cstring(h.inner.name()))
}

/// # Safety
/// `db` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_flush(
    db: *mut rb_t,
    options: *const rb_flushoptions_t,
    status: *mut rb_status_t,
) {
    rb_flush_cf(db, options, ptr::null(), status)
}

/// # Safety
/// `db` must be live; `cf` must be live or null.
#[no_mangle]
pub unsafe extern "C" fn rb_flush_cf(
    db: *mut rb_t,
    options: *const rb_flushoptions_t,
    cf: *const rb_column_family_handle_t,
    status: *mut rb_status_t,
) {
    let options = options.as_ref().map(|o| o.inner).unwrap_or_default();
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.flush(&options, &cf)
    });
    report(status, result);
}

/// Compact a column family. A null `start` or `limit` leaves that side of
/// the range open.
///
/// # Safety
/// `db` must be live; bounds must be null or valid for their lengths.
#[no_mangle]
pub unsafe extern "C" fn rb_compact_range_cf(
    db: *mut rb_t,
    cf: *const rb_column_family_handle_t,
    start: *const c_char,
    start_len: size_t,
    limit: *const c_char,
    limit_len: size_t,
    status: *mut rb_status_t,
) {
    let start = (!start.is_null()).then(|| bytes(start, start_len));
    let limit = (!limit.is_null()).then(|| bytes(limit, limit_len));
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.compact_range(&cf, start, limit)
    });
    report(status, result);
}

/// # Safety
/// Same as [`rb_compact_range_cf`].
#[no_mangle]
pub unsafe extern "C" fn rb_compact_range(
    db: *mut rb_t,
    start: *const c_char,
    start_len: size_t,
    limit: *const c_char,
    limit_len: size_t,
    status: *mut rb_status_t,
) {
    rb_compact_range_cf(db, ptr::null(), start, start_len, limit, limit_len, status)
}

/// Property value as a `malloc`'d string, null for an unknown property.
///
/// # Safety
/// `db` must be live; `name` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn rb_property_value_cf(
    db: *mut rb_t,
    cf: *const rb_column_family_handle_t,
    name: *const c_char,
) -> *mut c_char {
    let result = database(db).and_then(|db| {
        let cf = column_family(db, cf)?;
        db.property(&*cf, c_str(name)?)
    });
    match result {
        Ok(Some(value)) => malloc_cstring(&value),
        Ok(None) => ptr::null_mut(),
        Err(e) => {
            tracing::debug!(error = %e, "property lookup failed");
            ptr::null_mut()
        }
    }
}

/// # Safety
/// Same as [`rb_property_value_cf`].
#[no_mangle]
pub unsafe extern "C" fn rb_property_value(db: *mut rb_t, name: *const c_char) -> *mut c_char {
    rb_property_value_cf(db, ptr::null(), name)
}

/// # Safety
/// `db` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_get_latest_sequence_number(db: *mut rb_t) -> u64 {
    database(db).map_or(0, Db::latest_sequence_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{rb_options_create, rb_options_destroy, rb_options_set_create_if_missing};
    use crate::raw::{decode_status, take_malloced};
    use std::ffi::CString;
    use tempfile::TempDir;

    unsafe fn open(dir: &TempDir) -> *mut rb_t {
        let options = rb_options_create();
        rb_options_set_create_if_missing(options, 1);
        let path = CString::new(dir.path().to_str().unwrap()).unwrap();
        let mut status = rb_status_t::ok();
        let db = rb_open(options, path.as_ptr(), &mut status);
        rb_options_destroy(options);
        assert!(decode_status(&mut status).is_ok());
        db
    }

    #[test]
    fn test_put_get_through_c_surface() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let mut status = rb_status_t::ok();
            rb_put(db, ptr::null(), b"k".as_ptr() as _, 1, b"v".as_ptr() as _, 1, &mut status);
            assert!(decode_status(&mut status).is_ok());

            let mut len = 0;
            let value = rb_get(db, ptr::null(), b"k".as_ptr() as _, 1, &mut len, &mut status);
            assert!(decode_status(&mut status).is_ok());
            assert_eq!(take_malloced(value, len), b"v");

            let missing = rb_get(db, ptr::null(), b"x".as_ptr() as _, 1, &mut len, &mut status);
            assert!(missing.is_null());
            assert!(decode_status(&mut status).is_not_found());

            assert_eq!(rb_get_latest_sequence_number(db), 1);
            rb_close(db);
        }
    }

    #[test]
    fn test_open_twice_reports_io_error() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let path = CString::new(dir.path().to_str().unwrap()).unwrap();
            let mut status = rb_status_t::ok();
            let second = rb_open(ptr::null(), path.as_ptr(), &mut status);
            assert!(second.is_null());
            assert!(decode_status(&mut status).is_io_error());
            rb_close(db);
        }
    }

    #[test]
    fn test_children_outlive_database() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let mut status = rb_status_t::ok();
            rb_put(db, ptr::null(), b"a".as_ptr() as _, 1, b"1".as_ptr() as _, 1, &mut status);

            let snapshot = rb_create_snapshot(db);
            let iter = rb_create_iterator(db, ptr::null());
            let cf = rb_get_default_column_family_handle(db);
            rb_close(db);

            crate::iterator::rb_iter_seek_to_first(iter);
            assert_eq!(crate::iterator::rb_iter_valid(iter), 1);
            crate::iterator::rb_iter_destroy(iter);
            rb_release_snapshot(ptr::null_mut(), snapshot);
            let name = rb_column_family_handle_get_name(cf);
            assert_eq!(crate::raw::take_malloced_str(name), "default");
            rb_column_family_handle_destroy(cf);
        }
    }

    #[test]
    fn test_list_column_families() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let mut status = rb_status_t::ok();
            let name = CString::new("logs").unwrap();
            let cf = rb_create_column_family(db, ptr::null(), name.as_ptr(), &mut status);
            assert!(decode_status(&mut status).is_ok());
            rb_column_family_handle_destroy(cf);
            rb_close(db);

            let path = CString::new(dir.path().to_str().unwrap()).unwrap();
            let mut len = 0;
            let list = rb_list_column_families(ptr::null(), path.as_ptr(), &mut len, &mut status);
            assert!(decode_status(&mut status).is_ok());
            assert_eq!(len, 2);
            let second = std::ffi::CStr::from_ptr(*list.add(1)).to_str().unwrap().to_string();
            assert_eq!(second, "logs");
            rb_list_column_families_destroy(list, len);
        }
    }

    #[test]
    fn test_flush_and_property_on_named_column_family() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let mut status = rb_status_t::ok();
            let name = CString::new("logs").unwrap();
            let cf = rb_create_column_family(db, ptr::null(), name.as_ptr(), &mut status);
            assert!(decode_status(&mut status).is_ok());
            rb_put_cf(
                db,
                ptr::null(),
                cf,
                b"k".as_ptr() as _,
                1,
                b"v".as_ptr() as _,
                1,
                &mut status,
            );
            assert!(decode_status(&mut status).is_ok());

            let tables = CString::new(crate::db::properties::NUM_IMMUTABLE_TABLES).unwrap();
            let before = rb_property_value_cf(db, cf, tables.as_ptr());
            assert_eq!(crate::raw::take_malloced_str(before), "0");

            rb_flush_cf(db, ptr::null(), cf, &mut status);
            assert!(decode_status(&mut status).is_ok());
            let after = rb_property_value_cf(db, cf, tables.as_ptr());
            assert_eq!(crate::raw::take_malloced_str(after), "1");
            let default = rb_property_value(db, tables.as_ptr());
            assert_eq!(crate::raw::take_malloced_str(default), "0");

            rb_column_family_handle_destroy(cf);
            rb_close(db);
        }
    }

    #[test]
    fn test_read_only_open_through_c_surface() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let mut status = rb_status_t::ok();
            rb_put(db, ptr::null(), b"k".as_ptr() as _, 1, b"v".as_ptr() as _, 1, &mut status);
            rb_close(db);

            let path = CString::new(dir.path().to_str().unwrap()).unwrap();
            let strict = rb_open_for_read_only(ptr::null(), path.as_ptr(), 1, &mut status);
            assert!(strict.is_null());
            assert!(decode_status(&mut status).is_corruption());

            let db = rb_open_for_read_only(ptr::null(), path.as_ptr(), 0, &mut status);
            assert!(decode_status(&mut status).is_ok());
            let mut len = 0;
            let value = rb_get(db, ptr::null(), b"k".as_ptr() as _, 1, &mut len, &mut status);
            assert_eq!(take_malloced(value, len), b"v");
            rb_delete(db, ptr::null(), b"k".as_ptr() as _, 1, &mut status);
            assert!(decode_status(&mut status).is_not_supported());
            rb_close(db);
        }
    }

    #[test]
    fn test_iterators_and_sizes_through_c_surface() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let mut status = rb_status_t::ok();
            let name = CString::new("logs").unwrap();
            let logs = rb_create_column_family(db, ptr::null(), name.as_ptr(), &mut status);
            rb_put(db, ptr::null(), b"a".as_ptr() as _, 1, b"1".as_ptr() as _, 1, &mut status);
            let (key, value) = (b"l".as_ptr() as *const c_char, b"2".as_ptr() as *const c_char);
            rb_put_cf(db, ptr::null(), logs, key, 1, value, 1, &mut status);

            let cfs = [ptr::null(), logs as *const _];
            let mut iters = [ptr::null_mut(); 2];
            rb_create_iterators(db, ptr::null(), cfs.as_ptr(), 2, iters.as_mut_ptr(), &mut status);
            assert!(decode_status(&mut status).is_ok());
            for iter in iters {
                crate::iterator::rb_iter_seek_to_first(iter);
                assert_eq!(crate::iterator::rb_iter_valid(iter), 1);
                crate::iterator::rb_iter_destroy(iter);
            }

            rb_flush(db, ptr::null(), &mut status);
            let (start, limit) = (b"a", b"b");
            let starts = [start.as_ptr() as *const c_char];
            let limits = [limit.as_ptr() as *const c_char];
            let lens = [1usize];
            let mut sizes = [0u64];
            rb_approximate_sizes_cf(
                db,
                ptr::null(),
                1,
                starts.as_ptr(),
                lens.as_ptr(),
                limits.as_ptr(),
                lens.as_ptr(),
                sizes.as_mut_ptr(),
                &mut status,
            );
            assert!(decode_status(&mut status).is_ok());
            assert!(sizes[0] > 0);

            rb_column_family_handle_destroy(logs);
            rb_close(db);
        }
    }

    #[test]
    fn test_updates_since_through_c_surface() {
        let dir = TempDir::new().unwrap();
        unsafe {
            let db = open(&dir);
            let mut status = rb_status_t::ok();
            let value = b"v".as_ptr() as *const c_char;
            for key in [b"a", b"b", b"c"] {
                rb_put(db, ptr::null(), key.as_ptr() as _, 1, value, 1, &mut status);
            }

            let iter = rb_get_updates_since(db, 2, &mut status);
            assert!(decode_status(&mut status).is_ok());
            let mut sequences = Vec::new();
            while crate::transaction_log::rb_wal_iter_valid(iter) == 1 {
                let mut sequence = 0;
                let batch = crate::transaction_log::rb_wal_iter_get_batch(iter, &mut sequence);
                sequences.push(sequence);
                crate::write_batch::rb_writebatch_destroy(batch);
                crate::transaction_log::rb_wal_iter_next(iter);
            }
            assert_eq!(sequences, vec![2, 3]);
            crate::transaction_log::rb_wal_iter_destroy(iter);

            let ahead = rb_get_updates_since(db, 10, &mut status);
            assert!(ahead.is_null());
            assert!(decode_status(&mut status).is_not_found());
            rb_close(db);
        }
    }
}
