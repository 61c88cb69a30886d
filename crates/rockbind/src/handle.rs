//! Ownership of native objects.
//!
//! A [`Handle`] wraps one native pointer and deletes it at most once: either
//! on an explicit [`Handle::close`] or, failing that, when the handle is
//! dropped. Builtin objects (the byte-wise comparators, the no-op slice
//! transform) are static on the native side and wrapped as *borrowed*
//! handles, which never delete anything.

use rockbind_core::{Error, Result};
use std::fmt;
use std::ptr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A native object type and the function that deletes it.
pub trait NativeResource {
    /// Short name used in log events.
    const KIND: &'static str;

    /// Delete the object behind `raw`.
    ///
    /// # Safety
    /// `raw` must be a live, owned pointer of this type. It is never used
    /// again afterwards.
    unsafe fn destroy(raw: *mut Self);
}

/// Owner of exactly one native resource.
///
/// Every use of the pointer goes through a [`HandleGuard`], which holds the
/// handle's lock shared. [`Handle::close`] takes it exclusively, so a
/// release waits for calls in flight and later calls see a released handle.
/// Taking a guard on a handle whose guard the same thread already holds may
/// deadlock against a concurrent close.
pub struct Handle<T: NativeResource> {
    raw: *mut T,
    owned: bool,
    released: RwLock<bool>,
}

// Native objects may be used from any thread; wrappers that mutate native
// state serialise their calls themselves.
unsafe impl<T: NativeResource> Send for Handle<T> {}
unsafe impl<T: NativeResource> Sync for Handle<T> {}

/// Shared access to the pointer of a [`Handle`]. The resource is not
/// released while the guard lives.
pub struct HandleGuard<'a, T: NativeResource> {
    raw: *mut T,
    _lock: RwLockReadGuard<'a, bool>,
}

impl<T: NativeResource> HandleGuard<'_, T> {
    /// The native pointer, null if the handle was already released.
    pub fn as_ptr(&self) -> *mut T {
        self.raw
    }
}

impl<T: NativeResource> Handle<T> {
    /// Take ownership of `raw`. A null pointer gives an already released
    /// handle.
    pub fn owned(raw: *mut T) -> Self {
        Self::new(raw, true)
    }

    /// Wrap a static native object that must never be deleted.
    pub fn borrowed(raw: *const T) -> Self {
        Self::new(raw as *mut T, false)
    }

    fn new(raw: *mut T, owned: bool) -> Self {
        Self {
            raw,
            owned,
            released: RwLock::new(raw.is_null()),
        }
    }

    // The flag is always consistent; a poisoned lock is still usable
    fn read(&self) -> RwLockReadGuard<'_, bool> {
        self.released.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, bool> {
        self.released.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Borrow the pointer. A released handle gives a null pointer, which the
    /// engine reports as an invalid argument.
    pub fn get(&self) -> HandleGuard<'_, T> {
        let lock = self.read();
        let raw = if *lock { ptr::null_mut() } else { self.raw };
        HandleGuard { raw, _lock: lock }
    }

    /// Borrow the pointer of a live handle.
    pub fn require(&self) -> Result<HandleGuard<'_, T>> {
        let guard = self.get();
        if guard.raw.is_null() {
            return Err(Error::InvalidArgument(format!(
                "{} is released",
                T::KIND.replace('_', " ")
            )));
        }
        Ok(guard)
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    pub fn is_released(&self) -> bool {
        *self.read()
    }

    /// Release the native resource once no guard is held. Returns `true`
    /// for the call that performed the release; every later call is a
    /// no-op.
    pub fn close(&self) -> bool {
        let mut released = self.write();
        if *released {
            return false;
        }
        *released = true;
        if self.owned {
            tracing::debug!(kind = T::KIND, raw = ?self.raw, "releasing native handle");
            unsafe { T::destroy(self.raw) };
        }
        true
    }
}

/// Guards for the handles of `items` and the pointer for each position. A
/// wrapper listed more than once is locked once.
pub(crate) fn guard_all<'a, W, T: NativeResource>(
    items: &[&'a W],
    guard: impl Fn(&'a W) -> Result<HandleGuard<'a, T>>,
) -> Result<(Vec<HandleGuard<'a, T>>, Vec<*const T>)> {
    let mut held: Vec<(&'a W, HandleGuard<'a, T>)> = Vec::new();
    let mut ptrs = Vec::with_capacity(items.len());
    for &item in items {
        let raw = match held.iter().find(|(seen, _)| ptr::eq(*seen, item)) {
            Some((_, existing)) => existing.as_ptr(),
            None => {
                let fresh = guard(item)?;
                let raw = fresh.as_ptr();
                held.push((item, fresh));
                raw
            }
        };
        ptrs.push(raw as *const T);
    }
    Ok((held.into_iter().map(|(_, guard)| guard).collect(), ptrs))
}

impl<T: NativeResource> Drop for Handle<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: NativeResource> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &T::KIND)
            .field("raw", &self.raw)
            .field("owned", &self.owned)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    macro_rules! counting_resource {
        ($name:ident, $counter:ident) => {
            static $counter: AtomicUsize = AtomicUsize::new(0);

            struct $name;

            impl NativeResource for $name {
                const KIND: &'static str = stringify!($name);

                unsafe fn destroy(raw: *mut Self) {
                    drop(Box::from_raw(raw));
                    $counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        };
    }

    counting_resource!(RepeatedClose, REPEATED_CLOSE);
    counting_resource!(DropOnly, DROP_ONLY);
    counting_resource!(CloseThenDrop, CLOSE_THEN_DROP);
    counting_resource!(Borrowed, BORROWED);
    counting_resource!(Racing, RACING);
    counting_resource!(InUse, IN_USE);
    counting_resource!(Listed, LISTED);

    #[test]
    fn test_close_many_times_deletes_once() {
        let handle = Handle::owned(Box::into_raw(Box::new(RepeatedClose)));
        assert!(handle.close());
        for _ in 0..4 {
            assert!(!handle.close());
        }
        assert!(handle.is_released());
        assert!(handle.get().as_ptr().is_null());
        drop(handle);
        assert_eq!(REPEATED_CLOSE.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_is_the_backstop() {
        {
            let _handle = Handle::owned(Box::into_raw(Box::new(DropOnly)));
        }
        assert_eq!(DROP_ONLY.load(Ordering::SeqCst), 1);

        let handle = Handle::owned(Box::into_raw(Box::new(CloseThenDrop)));
        handle.close();
        drop(handle);
        assert_eq!(CLOSE_THEN_DROP.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_borrowed_handle_never_deletes() {
        let raw = Box::into_raw(Box::new(Borrowed));
        let handle = Handle::borrowed(raw);
        assert!(!handle.is_owned());
        assert!(handle.close());
        drop(handle);
        assert_eq!(BORROWED.load(Ordering::SeqCst), 0);
        unsafe { drop(Box::from_raw(raw)) };
    }

    #[test]
    fn test_null_is_already_released() {
        let handle: Handle<RepeatedClose> = Handle::owned(ptr::null_mut());
        assert!(handle.is_released());
        assert!(!handle.close());
    }

    #[test]
    fn test_concurrent_close_deletes_once() {
        let handle = Arc::new(Handle::owned(Box::into_raw(Box::new(Racing))));
        let closers: Vec<_> = (0..8)
            .map(|_| {
                let handle = Arc::clone(&handle);
                thread::spawn(move || handle.close())
            })
            .collect();
        let wins = closers
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
        drop(handle);
        assert_eq!(RACING.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_require_on_released_handle_is_an_error() {
        let handle: Handle<RepeatedClose> = Handle::owned(ptr::null_mut());
        let err = handle.require().err().unwrap();
        assert_eq!(err.to_string(), "Invalid argument: RepeatedClose is released");
    }

    #[test]
    fn test_close_waits_for_guards() {
        let handle = Arc::new(Handle::owned(Box::into_raw(Box::new(InUse))));
        let guard = handle.require().unwrap();
        let closer = {
            let handle = Arc::clone(&handle);
            thread::spawn(move || handle.close())
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(IN_USE.load(Ordering::SeqCst), 0);
        assert!(!guard.as_ptr().is_null());
        drop(guard);

        assert!(closer.join().unwrap());
        assert_eq!(IN_USE.load(Ordering::SeqCst), 1);
        assert!(handle.require().is_err());
    }

    #[test]
    fn test_guard_all_locks_repeats_once() {
        let first = Handle::owned(Box::into_raw(Box::new(Listed)));
        let second = Handle::owned(Box::into_raw(Box::new(Listed)));
        let (held, ptrs) = guard_all(&[&first, &second, &first], Handle::require).unwrap();
        assert_eq!(held.len(), 2);
        assert_eq!(ptrs[0], ptrs[2]);
        assert_ne!(ptrs[0], ptrs[1]);
        drop(held);

        second.close();
        assert!(guard_all(&[&first, &second], Handle::require).is_err());
    }
}
