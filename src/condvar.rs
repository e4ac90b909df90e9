//! Condition variables for slim locks.

use core::fmt;
use std::time::{Duration, Instant};

use crate::mutex::MutexGuard;

/// Whether a timed wait returned because of a notification or because its
/// timeout elapsed.
///
/// Returned by [`Condvar::wait_for`] and [`Condvar::wait_until`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    pub(crate) const fn new(timed_out: bool) -> Self {
        Self(timed_out)
    }

    /// Returns `true` if the wait ended because the timeout elapsed.
    #[must_use]
    #[inline]
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

/// A condition variable paired with a slim lock.
///
/// The wait operations atomically release the lock and park the calling
/// thread, then re-acquire the lock before returning, including when a
/// timed wait runs out. Waking up does not imply the awaited condition
/// holds: waits are subject to the usual races with other acquirers, so the
/// predicate must be re-checked in a loop.
///
/// Because an idle slim lock carries no kernel object to park on, the first
/// wait inflates the lock just as contention does; the lock deflates again
/// once no thread is waiting on it.
///
/// A `Condvar` may be associated with only one slim lock at a time. Waiting
/// on one condition variable through two different locks concurrently is a
/// programming error and panics.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use slimlock::{Condvar, Mutex};
///
/// let pair = Arc::new((Mutex::new(false), Condvar::new()));
/// let pair2 = Arc::clone(&pair);
///
/// thread::spawn(move || {
///     let (lock, cvar) = &*pair2;
///     let mut started = lock.lock();
///     *started = true;
///     cvar.notify_one();
/// });
///
/// // Wait for the thread to start up.
/// let (lock, cvar) = &*pair;
/// let mut started = lock.lock();
/// while !*started {
///     cvar.wait(&mut started);
/// }
/// assert!(*started);
/// ```
pub struct Condvar {
    queue: parking_lot::Condvar,
}

impl Condvar {
    /// Creates a new condition variable ready to be waited on and notified.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self { queue: parking_lot::Condvar::new() }
    }

    /// Blocks the current thread until this condition variable is notified.
    ///
    /// The lock behind `guard` is released for the duration of the wait and
    /// re-acquired before this call returns.
    pub fn wait<T: ?Sized>(&self, guard: &mut MutexGuard<'_, T>) {
        // A live guard means the calling thread holds the lock.
        guard.raw().wait(self).expect("condvar waiter does not hold the lock");
    }

    /// Waits on this condition variable, giving up once `timeout` elapses.
    ///
    /// The lock is re-acquired before this call returns even when the wait
    /// timed out.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use slimlock::{Condvar, Mutex};
    ///
    /// let lock = Mutex::new(());
    /// let never = Condvar::new();
    ///
    /// let mut guard = lock.lock();
    /// let result = never.wait_for(&mut guard, Duration::from_millis(1));
    /// assert!(result.timed_out());
    /// ```
    pub fn wait_for<T: ?Sized>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        timeout: Duration,
    ) -> WaitTimeoutResult {
        guard.raw().wait_for(self, timeout).expect("condvar waiter does not hold the lock")
    }

    /// Waits on this condition variable, giving up once `deadline` is
    /// reached.
    ///
    /// The lock is re-acquired before this call returns even when the wait
    /// timed out.
    pub fn wait_until<T: ?Sized>(
        &self,
        guard: &mut MutexGuard<'_, T>,
        deadline: Instant,
    ) -> WaitTimeoutResult {
        guard.raw().wait_until(self, deadline).expect("condvar waiter does not hold the lock")
    }

    /// Wakes up one thread blocked on this condition variable.
    ///
    /// Returns `true` if a thread was woken.
    #[inline]
    pub fn notify_one(&self) -> bool {
        self.queue.notify_one()
    }

    /// Wakes up all threads blocked on this condition variable.
    ///
    /// Returns the number of threads woken.
    #[inline]
    pub fn notify_all(&self) -> usize {
        self.queue.notify_all()
    }

    /// The underlying wait queue, parked on with the fat record's inner
    /// mutex.
    pub(crate) fn queue(&self) -> &parking_lot::Condvar {
        &self.queue
    }
}

impl Default for Condvar {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condvar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Condvar { .. }")
    }
}
