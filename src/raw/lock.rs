use core::fmt;
use core::ptr;
use core::sync::atomic::AtomicPtr;
use core::sync::atomic::Ordering::{AcqRel, SeqCst};
use std::time::{Duration, Instant};

use parking_lot::MutexGuard;

use crate::condvar::{Condvar, WaitTimeoutResult};
use crate::error::{NotOwnerError, TransferError};
use crate::raw::record::{FatRecord, FatState, Header, Peg, Tag};

/// Head-word value of a held, uncontended lock.
const HELD: *mut Header = ptr::without_provenance_mut(1);

/// The head word changed under a promotion or pegging attempt; the caller
/// must reload it and start over.
struct LostRace;

/// A fat record with its inner mutex held.
///
/// Holding the inner mutex is itself what keeps the record alive for the
/// bearer: reclamation requires a strict head-word CAS taken under this same
/// mutex, so no other thread can free the record out from under a handle.
struct FatHandle<'a> {
    ptr: *mut FatRecord,
    guard: MutexGuard<'a, FatState>,
}

impl FatHandle<'_> {
    /// Takes the lock, parking on `held_cond` for as long as another thread
    /// holds it. The caller must already be accounted for in `refcount`;
    /// that pin becomes the holder's pseudo-pin. Consumes the handle,
    /// releasing the inner mutex.
    fn acquire(mut self) {
        if self.guard.held {
            self.guard.waiters += 1;
            while self.guard.held {
                let record = unsafe { &*self.ptr };
                record.held_cond.wait(&mut self.guard);
            }
            self.guard.waiters -= 1;
        }
        self.guard.held = true;
    }
}

/// A mutual exclusion primitive whose idle footprint is a single word.
///
/// An unheld `SlimLock` is one null pointer wide and allocates nothing. On
/// first contention (or first condition wait) the word is promoted into a
/// heap record carrying a conventional blocking mutex and condition
/// variable; once the last interested thread moves on, the record is
/// reclaimed and the lock deflates back to a bare word. This makes the type
/// suitable for data structures that embed very large numbers of rarely
/// contended lock sites.
///
/// This is the raw, data-less lock. It does not enforce the pairing of
/// [`lock`] and [`unlock`] through a guard; misuse is reported through
/// status results rather than made unrepresentable. For protecting data,
/// prefer the RAII [`Mutex`] wrapper.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use slimlock::raw::SlimLock;
///
/// let lock = Arc::new(SlimLock::new());
/// let mut handles = Vec::new();
/// for _ in 0..4 {
///     let lock = Arc::clone(&lock);
///     handles.push(thread::spawn(move || {
///         lock.lock();
///         // critical section
///         lock.unlock().unwrap();
///     }));
/// }
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert!(!lock.is_locked());
/// ```
///
/// [`lock`]: SlimLock::lock
/// [`unlock`]: SlimLock::unlock
/// [`Mutex`]: crate::Mutex
pub struct SlimLock {
    /// `null` when unheld, `1` when held and uncontended, otherwise a
    /// pointer to a chain of zero or more pegs ending in a fat record. All
    /// accesses are sequentially consistent.
    head: AtomicPtr<Header>,
}

impl SlimLock {
    /// Creates a new unheld lock.
    ///
    /// The lock is a single word and performs no allocation until it is
    /// contended, so it can live in `static` storage:
    ///
    /// ```
    /// use slimlock::raw::SlimLock;
    ///
    /// static LOCK: SlimLock = SlimLock::new();
    ///
    /// LOCK.lock();
    /// LOCK.unlock().unwrap();
    /// ```
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self { head: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Acquires the lock, blocking the current thread until it is able to
    /// do so.
    #[inline]
    pub fn lock(&self) {
        if self.head.compare_exchange(ptr::null_mut(), HELD, SeqCst, SeqCst).is_err() {
            self.lock_slow();
        }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `true` if the lock was acquired, `false` if it is held by
    /// another thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use slimlock::raw::SlimLock;
    ///
    /// let lock = SlimLock::new();
    /// assert!(lock.try_lock());
    /// assert!(!lock.try_lock());
    /// lock.unlock().unwrap();
    /// ```
    #[inline]
    pub fn try_lock(&self) -> bool {
        match self.head.compare_exchange(ptr::null_mut(), HELD, SeqCst, SeqCst) {
            Ok(_) => true,
            Err(cur) if cur == HELD => false,
            Err(_) => self.try_lock_slow(),
        }
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Fails with [`NotOwnerError`] if the lock is not held.
    ///
    /// ```
    /// use slimlock::raw::SlimLock;
    ///
    /// let lock = SlimLock::new();
    /// assert!(lock.unlock().is_err());
    ///
    /// lock.lock();
    /// assert!(lock.unlock().is_ok());
    /// ```
    #[inline]
    pub fn unlock(&self) -> Result<(), NotOwnerError> {
        if self.head.compare_exchange(HELD, ptr::null_mut(), SeqCst, SeqCst).is_ok() {
            return Ok(());
        }
        self.unlock_slow()
    }

    /// Blocks on `condvar` until notified, releasing the lock for the
    /// duration of the wait and re-acquiring it before returning.
    ///
    /// As with any condition variable, the predicate must be re-checked
    /// after every wake-up.
    ///
    /// # Errors
    ///
    /// Fails with [`NotOwnerError`] if the lock is not held; the lock must
    /// be held by the calling thread when waiting.
    pub fn wait(&self, condvar: &Condvar) -> Result<(), NotOwnerError> {
        self.wait_inner(condvar, None).map(drop)
    }

    /// As [`wait`], but gives up waiting once `timeout` has elapsed. The
    /// lock is re-acquired before returning even when the wait timed out.
    ///
    /// # Errors
    ///
    /// Fails with [`NotOwnerError`] if the lock is not held.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use slimlock::raw::SlimLock;
    /// use slimlock::Condvar;
    ///
    /// let lock = SlimLock::new();
    /// let never = Condvar::new();
    ///
    /// lock.lock();
    /// let result = lock.wait_for(&never, Duration::from_millis(1)).unwrap();
    /// assert!(result.timed_out());
    /// lock.unlock().unwrap();
    /// ```
    ///
    /// [`wait`]: SlimLock::wait
    pub fn wait_for(
        &self,
        condvar: &Condvar,
        timeout: Duration,
    ) -> Result<WaitTimeoutResult, NotOwnerError> {
        self.wait_inner(condvar, Some(Instant::now() + timeout))
    }

    /// As [`wait`], but gives up waiting once `deadline` is reached. The
    /// lock is re-acquired before returning even when the wait timed out.
    ///
    /// # Errors
    ///
    /// Fails with [`NotOwnerError`] if the lock is not held.
    ///
    /// [`wait`]: SlimLock::wait
    pub fn wait_until(
        &self,
        condvar: &Condvar,
        deadline: Instant,
    ) -> Result<WaitTimeoutResult, NotOwnerError> {
        self.wait_inner(condvar, Some(deadline))
    }

    /// Hands the calling thread off from this lock to `to`: acquires `to`,
    /// then releases this lock. Blocks while `to` is held, like [`lock`],
    /// except that the holder of `to` may abort the hand-off with
    /// [`veto_transfer`].
    ///
    /// On success the caller holds `to` and no longer holds this lock. On
    /// failure the caller's holdings are unchanged.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotOwner`] if this lock is not held. This is
    ///   checked before `to` is touched.
    /// - [`TransferError::Vetoed`] if the holder of `to` vetoed the
    ///   hand-off while this thread was parked; this lock is still held.
    ///
    /// # Examples
    ///
    /// ```
    /// use slimlock::raw::SlimLock;
    ///
    /// let a = SlimLock::new();
    /// let b = SlimLock::new();
    ///
    /// a.lock();
    /// a.transfer(&b).unwrap();
    /// assert!(!a.is_locked());
    /// b.unlock().unwrap();
    /// ```
    ///
    /// [`lock`]: SlimLock::lock
    /// [`veto_transfer`]: SlimLock::veto_transfer
    pub fn transfer(&self, to: &SlimLock) -> Result<(), TransferError> {
        self.check_owner()?;
        to.lock_abortable()?;
        // The hand-off is complete only once the source is released.
        if self.unlock().is_err() {
            // The source was released by somebody else mid-transfer; undo
            // the target acquisition so the failure leaves no residue.
            let _ = to.unlock();
            return Err(TransferError::NotOwner);
        }
        Ok(())
    }

    /// Aborts every hand-off currently parked on this lock, making each
    /// pending [`transfer`] return [`TransferError::Vetoed`]. A no-op if
    /// nothing is parked.
    ///
    /// # Errors
    ///
    /// Fails with [`NotOwnerError`] if the lock is not held; only the
    /// holder may veto.
    ///
    /// ```
    /// use slimlock::raw::SlimLock;
    ///
    /// let lock = SlimLock::new();
    /// assert!(lock.veto_transfer().is_err());
    ///
    /// lock.lock();
    /// lock.veto_transfer().unwrap();
    /// lock.unlock().unwrap();
    /// ```
    ///
    /// [`transfer`]: SlimLock::transfer
    pub fn veto_transfer(&self) -> Result<(), NotOwnerError> {
        loop {
            let head = self.head.load(SeqCst);
            if head.is_null() {
                return Err(NotOwnerError);
            }
            if head == HELD {
                // Held and never inflated: nothing can be parked here.
                return Ok(());
            }
            let Ok(mut fat) = self.obtain(head) else { continue };
            if !fat.guard.held {
                return Err(NotOwnerError);
            }
            fat.guard.transfer_epoch += 1;
            if fat.guard.waiters > 0 {
                unsafe { &*fat.ptr }.held_cond.notify_all();
            }
            return Ok(());
        }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// The answer is a snapshot with no synchronization guarantees, so it
    /// is only useful as a heuristic. An inflated lock reports `true` for
    /// as long as its heavy record exists, including the window between a
    /// release and the reclamation performed by the last interested thread.
    #[inline]
    pub fn is_locked(&self) -> bool {
        !self.head.load(SeqCst).is_null()
    }

    /// Returns `true` if the lock currently carries a heap-allocated
    /// record, i.e. it has been contended or waited on and the contention
    /// has not yet fully drained.
    #[inline]
    pub fn is_inflated(&self) -> bool {
        self.head.load(SeqCst).addr() > 1
    }

    #[cold]
    fn lock_slow(&self) {
        loop {
            let head = self.head.load(SeqCst);
            if head.is_null() {
                if self.head.compare_exchange(head, HELD, SeqCst, SeqCst).is_ok() {
                    return;
                }
                continue;
            }
            let Ok(mut fat) = self.obtain(head) else { continue };
            // This thread's waiter pin; it becomes the holder's pseudo-pin
            // once the lock is taken.
            fat.guard.refcount += 1;
            fat.acquire();
            return;
        }
    }

    #[cold]
    fn try_lock_slow(&self) -> bool {
        loop {
            let head = self.head.load(SeqCst);
            if head.is_null() {
                if self.head.compare_exchange(head, HELD, SeqCst, SeqCst).is_ok() {
                    return true;
                }
                continue;
            }
            if head == HELD {
                return false;
            }
            let Ok(mut fat) = self.peg(head) else { continue };
            if fat.guard.held {
                // The holder's pseudo-pin forbids demotion here; dropping
                // the handle releases the inner mutex and nothing else.
                return false;
            }
            fat.guard.refcount += 1;
            fat.guard.held = true;
            return true;
        }
    }

    #[cold]
    fn unlock_slow(&self) -> Result<(), NotOwnerError> {
        let mut fat = self.obtain_held()?;
        fat.guard.held = false;
        if fat.guard.waiters > 0 {
            unsafe { &*fat.ptr }.held_cond.notify_one();
        }
        self.release_fat(fat);
        Ok(())
    }

    /// Releases the lock while parked on `condvar`, re-acquiring it before
    /// returning regardless of how the wait ended.
    fn wait_inner(
        &self,
        condvar: &Condvar,
        deadline: Option<Instant>,
    ) -> Result<WaitTimeoutResult, NotOwnerError> {
        let mut fat = self.obtain_held()?;
        // A parked acquirer may be able to run while this thread is off
        // the lock.
        if fat.guard.waiters > 0 {
            unsafe { &*fat.ptr }.held_cond.notify_one();
        }
        // Relinquish the lock without touching `refcount`: the holder's
        // pseudo-pin stays behind as this thread's parked-waiter pin,
        // keeping the record alive for the duration of the wait.
        fat.guard.held = false;
        let timed_out = match deadline {
            Some(deadline) => condvar.queue().wait_until(&mut fat.guard, deadline).timed_out(),
            None => {
                condvar.queue().wait(&mut fat.guard);
                false
            }
        };
        fat.acquire();
        Ok(WaitTimeoutResult::new(timed_out))
    }

    /// Finds and locks the fat record, minting one if the lock has not been
    /// inflated yet.
    fn obtain(&self, head: *mut Header) -> Result<FatHandle<'_>, LostRace> {
        if head.addr() <= 1 {
            self.promote(head)
        } else {
            self.peg(head)
        }
    }

    /// As [`obtain`], for callers that must already hold the lock. Reports
    /// [`NotOwnerError`] if the lock turns out to be unheld.
    ///
    /// [`obtain`]: SlimLock::obtain
    fn obtain_held(&self) -> Result<FatHandle<'_>, NotOwnerError> {
        loop {
            let head = self.head.load(SeqCst);
            if head.is_null() {
                return Err(NotOwnerError);
            }
            match self.obtain(head) {
                Ok(fat) if fat.guard.held => return Ok(fat),
                Ok(_) => return Err(NotOwnerError),
                Err(LostRace) => continue,
            }
        }
    }

    /// Verifies that the lock is held without leaving any trace beyond a
    /// possible pegging round trip.
    fn check_owner(&self) -> Result<(), NotOwnerError> {
        loop {
            let head = self.head.load(SeqCst);
            if head.is_null() {
                return Err(NotOwnerError);
            }
            if head == HELD {
                return Ok(());
            }
            match self.obtain(head) {
                Ok(fat) if fat.guard.held => return Ok(()),
                Ok(_) => return Err(NotOwnerError),
                Err(LostRace) => continue,
            }
        }
    }

    /// Acquires the lock with a parked wait that the holder can abort
    /// through [`SlimLock::veto_transfer`].
    fn lock_abortable(&self) -> Result<(), TransferError> {
        loop {
            let head = self.head.load(SeqCst);
            if head.is_null() {
                if self.head.compare_exchange(head, HELD, SeqCst, SeqCst).is_ok() {
                    return Ok(());
                }
                continue;
            }
            let Ok(mut fat) = self.obtain(head) else { continue };
            fat.guard.refcount += 1;
            if !fat.guard.held {
                fat.guard.held = true;
                return Ok(());
            }
            let epoch = fat.guard.transfer_epoch;
            fat.guard.waiters += 1;
            loop {
                let record = unsafe { &*fat.ptr };
                record.held_cond.wait(&mut fat.guard);
                if fat.guard.transfer_epoch != epoch {
                    fat.guard.waiters -= 1;
                    self.release_fat(fat);
                    return Err(TransferError::Vetoed);
                }
                if !fat.guard.held {
                    break;
                }
            }
            fat.guard.waiters -= 1;
            fat.guard.held = true;
            return Ok(());
        }
    }

    /// Promotes a head word still in its bare state (`head` is 0 or 1) into
    /// a freshly allocated fat record.
    fn promote(&self, head: *mut Header) -> Result<FatHandle<'_>, LostRace> {
        debug_assert!(head.addr() <= 1);
        let ptr = Box::into_raw(Box::new(FatRecord::new(!head.is_null())));
        // The inner mutex is taken before the record is published, so no
        // thread can observe it and proceed before the promoter is ready.
        let guard = unsafe { &*ptr }.state.lock();
        if self.head.compare_exchange(head, ptr.cast::<Header>(), SeqCst, SeqCst).is_ok() {
            Ok(FatHandle { ptr, guard })
        } else {
            drop(guard);
            // Never published; nobody else can have seen it.
            unsafe { drop(Box::from_raw(ptr)) };
            Err(LostRace)
        }
    }

    /// Safely dereferences a head word holding a pointer: installs a peg to
    /// pin the chain, walks it to the fat record, locks the record, then
    /// collapses the primary chain back to a direct head-to-fat pointer.
    ///
    /// Leaves `refcount` with no net change on behalf of the caller; the
    /// returned handle is protected by the inner mutex alone.
    fn peg(&self, head: *mut Header) -> Result<FatHandle<'_>, LostRace> {
        let peg = Box::into_raw(Box::new(Peg::new(head)));
        let mut expected = head;
        loop {
            match self.head.compare_exchange(expected, peg.cast::<Header>(), SeqCst, SeqCst) {
                Ok(_) => break,
                Err(cur) if cur.addr() <= 1 => {
                    // The chain vanished; there is no record left to pin.
                    unsafe { drop(Box::from_raw(peg)) };
                    return Err(LostRace);
                }
                Err(cur) => {
                    // A new chain head appeared; re-point the peg at it and
                    // try again.
                    unsafe { (*peg).next = cur };
                    expected = cur;
                }
            }
        }

        // The installed peg pins everything it links to: records on the
        // chain cannot be freed while the head word does not point directly
        // at the fat record. Walking and locking is now safe.
        let mut p = unsafe { (*peg).next };
        while unsafe { (*p).tag } == Tag::Peg {
            p = unsafe { (*p.cast::<Peg>()).next };
        }
        let ptr = p.cast::<FatRecord>();
        let mut guard = unsafe { &*ptr }.state.lock();

        // Point the head word straight at the fat record, dissolving the
        // primary chain. Pegs stranded by the exchange survive as a
        // secondary chain if their refcounts say so.
        let mut p = self.head.swap(ptr.cast::<Header>(), SeqCst);
        // The exchange manufactured a head-to-fat reference. It is only
        // real if a secondary chain ends up existing; the walks below
        // cancel it again otherwise.
        guard.refcount += 1;

        // Walk the old chain up to our own peg, retiring the head word's
        // pins. Our peg loses 2 if it is reached here (the chain pin and
        // the caller's own pin retire together), 1 otherwise.
        let mut delta = 2;
        loop {
            if p == peg.cast::<Header>() {
                break;
            }
            if p == ptr.cast::<Header>() {
                // Reached the fat record: the old chain had no pegs left
                // ahead of ours, so no secondary chain starts here.
                guard.refcount -= 1;
                delta = 1;
                break;
            }
            let chain = p.cast::<Peg>();
            if unsafe { (*chain).refcount.fetch_sub(1, AcqRel) } != 1 {
                // Still pinned by its installer: a secondary chain roots
                // here and inherits the manufactured reference.
                delta = 1;
                break;
            }
            p = unsafe { (*chain).next };
            unsafe { drop(Box::from_raw(chain)) };
        }

        // Retire the caller's pin on its own peg, then keep collapsing
        // whatever our peg was linking to.
        let mut peg = peg;
        loop {
            if unsafe { (*peg).refcount.fetch_sub(delta, AcqRel) } != delta {
                break;
            }
            let next = unsafe { (*peg).next };
            unsafe { drop(Box::from_raw(peg)) };
            if next == ptr.cast::<Header>() {
                guard.refcount -= 1;
                break;
            }
            peg = next.cast::<Peg>();
            delta = 1;
        }

        Ok(FatHandle { ptr, guard })
    }

    /// Drops one pin and demotes the lock if it was the last: when the
    /// decremented refcount is zero and the head word still points at the
    /// record, a strict CAS clears the head word and the record is freed.
    /// Any CAS failure means a peg was installed meanwhile, so the record
    /// must stay.
    fn release_fat(&self, fat: FatHandle<'_>) {
        let FatHandle { ptr, mut guard } = fat;
        debug_assert!(guard.refcount > 0);
        guard.refcount -= 1;
        let keep = guard.refcount != 0
            || self
                .head
                .compare_exchange(ptr.cast::<Header>(), ptr::null_mut(), SeqCst, SeqCst)
                .is_err();
        drop(guard);
        if !keep {
            // Zero pins and the head word no longer reaches the record;
            // nothing can address it anymore.
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

impl Default for SlimLock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SlimLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlimLock")
            .field("locked", &self.is_locked())
            .field("inflated", &self.is_inflated())
            .finish()
    }
}

impl Drop for SlimLock {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        if head.addr() > 1 {
            // Exclusive access means no thread is mid-protocol, so the
            // chain can only be the bare fat record.
            debug_assert_eq!(unsafe { (*head).tag }, Tag::Fat);
            unsafe { drop(Box::from_raw(head.cast::<FatRecord>())) };
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::SlimLock;
    use crate::Condvar;

    #[test]
    fn lock_unlock_round_trip() {
        let lock = SlimLock::new();
        lock.lock();
        assert!(lock.is_locked());
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[test]
    fn static_storage() {
        static LOCK: SlimLock = SlimLock::new();
        LOCK.lock();
        LOCK.unlock().unwrap();
    }

    #[test]
    fn uncontended_never_inflates() {
        let lock = SlimLock::new();
        for _ in 0..100 {
            lock.lock();
            assert!(!lock.is_inflated());
            lock.unlock().unwrap();
        }
        assert!(!lock.is_inflated());
    }

    #[test]
    fn unlock_not_owner() {
        let lock = SlimLock::new();
        assert!(lock.unlock().is_err());
        // Still in its initial state afterwards.
        assert!(!lock.is_locked());
        lock.lock();
        lock.unlock().unwrap();
    }

    #[test]
    fn try_lock_busy() {
        let lock = SlimLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        lock.unlock().unwrap();
        assert!(lock.try_lock());
        lock.unlock().unwrap();
    }

    #[test]
    fn timed_wait_inflates_then_deflates() {
        let lock = SlimLock::new();
        let never = Condvar::new();

        lock.lock();
        let result = lock.wait_for(&never, Duration::from_millis(1)).unwrap();
        assert!(result.timed_out());
        // The wait minted a fat record and the lock is held again.
        assert!(lock.is_inflated());
        assert!(lock.is_locked());

        // Releasing the last pin reclaims the record.
        lock.unlock().unwrap();
        assert!(!lock.is_inflated());
        assert!(!lock.is_locked());
    }

    #[test]
    fn wait_requires_holding() {
        let lock = SlimLock::new();
        let cond = Condvar::new();
        assert!(lock.wait(&cond).is_err());
        assert!(lock.wait_for(&cond, Duration::from_millis(1)).is_err());
    }

    #[test]
    fn transfer_immediate() {
        let a = SlimLock::new();
        let b = SlimLock::new();

        a.lock();
        a.transfer(&b).unwrap();
        assert!(!a.is_locked());
        assert!(b.is_locked());
        b.unlock().unwrap();
    }

    #[test]
    fn transfer_not_owner() {
        let a = SlimLock::new();
        let b = SlimLock::new();
        assert!(a.transfer(&b).is_err());
        assert!(!a.is_locked());
        assert!(!b.is_locked());
    }

    #[test]
    fn veto_without_transfers() {
        let lock = SlimLock::new();
        assert!(lock.veto_transfer().is_err());
        lock.lock();
        lock.veto_transfer().unwrap();
        lock.unlock().unwrap();
    }

    #[test]
    fn drop_reclaims_inflated_lock() {
        let lock = SlimLock::new();
        let never = Condvar::new();
        lock.lock();
        let _ = lock.wait_for(&never, Duration::from_millis(1)).unwrap();
        // Dropped while inflated and held; the record is reclaimed.
    }
}
