//! Snapshots pin a sequence number; reads through a snapshot see the
//! database as of that sequence. While any snapshot is alive, flushes and
//! compactions keep every version.

use rockbind_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Live snapshots of one database, counted per sequence number.
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    live: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotList {
    fn acquire(&self, sequence: u64) -> Result<()> {
        let mut live = self.live.lock().map_err(|_| Error::LockPoisoned)?;
        *live.entry(sequence).or_insert(0) += 1;
        Ok(())
    }

    fn release(&self, sequence: u64) {
        let Ok(mut live) = self.live.lock() else {
            return;
        };
        if let Some(count) = live.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                live.remove(&sequence);
            }
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.live
            .lock()
            .map(|live| live.values().sum())
            .unwrap_or(0)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub(crate) fn oldest(&self) -> Option<u64> {
        self.live
            .lock()
            .ok()
            .and_then(|live| live.keys().next().copied())
    }
}

/// One pinned sequence number. The pin is shared by the snapshot and by any
/// read options set from it, and released when the last of them is dropped.
#[derive(Debug)]
pub struct SnapshotPin {
    sequence: u64,
    list: Arc<SnapshotList>,
}

impl SnapshotPin {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

/// A pinned read view. Releasing (dropping) it unpins the sequence number,
/// even after the database itself has been closed, unless read options
/// still hold the pin.
pub struct rb_snapshot_t {
    pin: Arc<SnapshotPin>,
}

impl rb_snapshot_t {
    pub(crate) fn new(sequence: u64, list: Arc<SnapshotList>) -> Result<Self> {
        list.acquire(sequence)?;
        Ok(Self {
            pin: Arc::new(SnapshotPin { sequence, list }),
        })
    }

    pub fn sequence(&self) -> u64 {
        self.pin.sequence
    }

    pub(crate) fn pin(&self) -> Arc<SnapshotPin> {
        Arc::clone(&self.pin)
    }

    pub(crate) fn belongs_to(&self, list: &Arc<SnapshotList>) -> bool {
        Arc::ptr_eq(&self.pin.list, list)
    }
}

/// Sequence number the snapshot reads at.
///
/// # Safety
/// `snapshot` must be live.
#[no_mangle]
pub unsafe extern "C" fn rb_snapshot_get_sequence_number(snapshot: *const rb_snapshot_t) -> u64 {
    snapshot.as_ref().map_or(0, rb_snapshot_t::sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_pins_until_dropped() {
        let list = Arc::new(SnapshotList::default());
        let a = rb_snapshot_t::new(5, Arc::clone(&list)).unwrap();
        let b = rb_snapshot_t::new(5, Arc::clone(&list)).unwrap();
        let c = rb_snapshot_t::new(9, Arc::clone(&list)).unwrap();

        assert_eq!(list.count(), 3);
        assert_eq!(list.oldest(), Some(5));

        drop(a);
        assert_eq!(list.oldest(), Some(5));
        drop(b);
        assert_eq!(list.oldest(), Some(9));
        assert!(c.belongs_to(&list));
        drop(c);
        assert!(list.is_empty());
    }

    #[test]
    fn test_shared_pin_outlives_snapshot() {
        let list = Arc::new(SnapshotList::default());
        let snapshot = rb_snapshot_t::new(3, Arc::clone(&list)).unwrap();
        let pin = snapshot.pin();

        drop(snapshot);
        assert_eq!(list.oldest(), Some(3));
        assert_eq!(pin.sequence(), 3);
        drop(pin);
        assert!(list.is_empty());
    }
}
