//! Locking interfaces for the slim lock that are compatible with
//! [lock_api].
//!
//! This module implements the [`lock_api::RawMutex`] trait for
//! [`raw::SlimLock`] and exports [`Mutex`] and [`MutexGuard`] type aliases
//! over it, so the slim lock can be plugged into any API generic over
//! `lock_api`.
//!
//! The condition-wait and hand-off operations are not part of the
//! `lock_api` vocabulary; they remain available on the raw lock.
//!
//! [`raw::SlimLock`]: crate::raw::SlimLock
//! [lock_api]: https://crates.io/crates/lock_api
//! [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html

use crate::raw::SlimLock;

#[cfg(test)]
use crate::test::{LockData, LockNew, LockThen, TryLockThen};

// SAFETY: The slim lock provides mutual exclusion between `lock` and
// `unlock`, and `try_lock` only reports success when the lock was taken.
unsafe impl lock_api::RawMutex for SlimLock {
    const INIT: Self = Self::new();

    // The lock records no holder identity, so a guard may be released from
    // a thread other than the one that acquired it.
    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        SlimLock::lock(self);
    }

    #[inline]
    fn try_lock(&self) -> bool {
        SlimLock::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        let released = SlimLock::unlock(self);
        debug_assert!(released.is_ok(), "unlock of a lock that is not held");
    }

    #[inline]
    fn is_locked(&self) -> bool {
        SlimLock::is_locked(self)
    }
}

/// A [`lock_api::Mutex`] backed by the slim lock.
///
/// # Example
///
/// ```
/// use slimlock::lock_api::Mutex;
///
/// let mutex = Mutex::new(0);
/// let guard = mutex.lock();
/// assert_eq!(*guard, 0);
/// ```
///
/// [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
pub type Mutex<T> = lock_api::Mutex<SlimLock, T>;

/// A [`lock_api::MutexGuard`] backed by the slim lock.
///
/// [`lock_api::MutexGuard`]: https://docs.rs/lock_api/latest/lock_api/struct.MutexGuard.html
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, SlimLock, T>;

#[cfg(test)]
impl<T: ?Sized> LockNew for Mutex<T> {
    type Target = T;

    fn new(value: Self::Target) -> Self
    where
        Self::Target: Sized,
    {
        Self::new(value)
    }
}

#[cfg(test)]
impl<T: ?Sized> LockThen for Mutex<T> {
    fn lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut Self::Target) -> Ret,
    {
        f(&mut *self.lock())
    }
}

#[cfg(test)]
impl<T: ?Sized> TryLockThen for Mutex<T> {
    fn try_lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(Option<&mut Self::Target>) -> Ret,
    {
        f(self.try_lock().as_deref_mut())
    }

    fn is_locked(&self) -> bool {
        self.is_locked()
    }
}

#[cfg(test)]
impl<T: ?Sized> LockData for Mutex<T> {
    fn into_inner(self) -> Self::Target
    where
        Self::Target: Sized,
    {
        self.into_inner()
    }

    fn get_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}
