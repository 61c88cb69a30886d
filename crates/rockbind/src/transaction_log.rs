//! Replaying logged writes.

use crate::handle::{Handle, NativeResource};
use crate::marshal::with_status;
use crate::write_batch::WriteBatch;
use rockbind_core::Result;
use rockbind_native as ffi;

impl NativeResource for ffi::rb_wal_iterator_t {
    const KIND: &'static str = "transaction_log_iterator";

    unsafe fn destroy(raw: *mut Self) {
        ffi::rb_wal_iter_destroy(raw)
    }
}

/// The write batches logged since a sequence number, oldest first, from
/// [`crate::DB::updates_since`].
///
/// Each item is the sequence number of the batch's first operation and a
/// copy of the batch, ready to be applied to another database with
/// [`crate::DB::write`]. The batches are read when the iterator is created,
/// so it does not borrow the database.
#[derive(Debug)]
pub struct TransactionLogIterator {
    handle: Handle<ffi::rb_wal_iterator_t>,
}

impl TransactionLogIterator {
    pub(crate) fn new(raw: *mut ffi::rb_wal_iterator_t) -> Self {
        Self {
            handle: Handle::owned(raw),
        }
    }

    pub fn valid(&self) -> bool {
        unsafe { ffi::rb_wal_iter_valid(self.handle.get().as_ptr()) != 0 }
    }

    /// Whether the log was read without error.
    pub fn status(&self) -> Result<()> {
        let handle = self.handle.require()?;
        with_status(|status| unsafe { ffi::rb_wal_iter_status(handle.as_ptr(), status) })
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl Iterator for TransactionLogIterator {
    type Item = (u64, WriteBatch);

    fn next(&mut self) -> Option<Self::Item> {
        let handle = self.handle.get();
        let mut sequence = 0;
        let batch = unsafe { ffi::rb_wal_iter_get_batch(handle.as_ptr(), &mut sequence) };
        if batch.is_null() {
            return None;
        }
        unsafe { ffi::rb_wal_iter_next(handle.as_ptr()) };
        Some((sequence, WriteBatch::from_raw(batch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, ReadOptions, WriteOptions, DB};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> DB {
        let mut opts = Options::new();
        opts.set_create_if_missing(true);
        DB::open(&opts, dir.path()).unwrap()
    }

    #[test]
    fn test_replay_into_another_database() {
        let (source_dir, replica_dir) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let (source, replica) = (open(&source_dir), open(&replica_dir));
        let w = WriteOptions::new();
        source.put(&w, b"a", b"1").unwrap();
        let batch = WriteBatch::new();
        batch.put(b"b", b"2");
        batch.delete(b"a");
        source.write(&w, &batch).unwrap();

        let updates = source.updates_since(1).unwrap();
        assert!(updates.valid());
        updates.status().unwrap();
        let mut sequences = Vec::new();
        for (sequence, batch) in updates {
            sequences.push(sequence);
            replica.write(&w, &batch).unwrap();
        }
        assert_eq!(sequences, vec![1, 2]);

        let r = ReadOptions::new();
        assert_eq!(replica.get(&r, b"a").unwrap(), None);
        assert_eq!(replica.get(&r, b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_starts_at_the_batch_holding_the_sequence() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let w = WriteOptions::new();
        let batch = WriteBatch::new();
        batch.put(b"a", b"1");
        batch.put(b"b", b"2");
        db.write(&w, &batch).unwrap();
        db.put(&w, b"c", b"3").unwrap();

        let firsts: Vec<u64> = db.updates_since(2).unwrap().map(|(seq, _)| seq).collect();
        assert_eq!(firsts, vec![1, 3]);
    }

    #[test]
    fn test_future_sequence_is_not_found() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.put(&WriteOptions::new(), b"a", b"1").unwrap();
        assert!(db.updates_since(5).unwrap_err().is_not_found());
    }

    #[test]
    fn test_closed_iterator_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.put(&WriteOptions::new(), b"a", b"1").unwrap();
        let mut updates = db.updates_since(1).unwrap();
        updates.close();
        assert!(!updates.valid());
        assert!(updates.next().is_none());
        assert!(updates.status().is_err());
    }
}
