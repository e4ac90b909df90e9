//! A blocking mutual exclusion lock whose idle footprint is a single
//! machine word.
//!
//! An unheld, uncontended [`SlimLock`] is one pointer-sized atomic word: no
//! heap allocation, no kernel object, no initialization beyond zeroing.
//! Acquisition and release are a single compare-and-swap each for as long
//! as the lock stays uncontended. Only when a thread actually has to block
//! (contended acquire, condition wait, or a parked hand-off) is the word
//! *inflated* into a heap record carrying a conventional blocking mutex and
//! condition variable; once the last interested thread moves on, the record
//! is reclaimed and the lock *deflates* back to a bare word.
//!
//! This makes the lock attractive for software that instantiates very large
//! numbers of potential lock sites - hash table buckets, per-object locks,
//! fine-grained tree nodes - where only a small fraction are ever contended
//! at once, and where paying a full mutex per site would be prohibitive.
//!
//! Deflation is what separates this design from a lazily initialized mutex:
//! the heavy record does not persist past its need. The price is a more
//! delicate release path, since a thread consulting the record must pin it
//! against concurrent reclamation; the crate does this with transient,
//! per-access *peg* records linked into the lock word itself.
//!
//! # Lock layers
//!
//! - [`Mutex`] and [`MutexGuard`]: the RAII layer protecting a value of
//!   type `T`, paired with [`Condvar`] for condition waits.
//! - [`raw::SlimLock`]: the bare word, with status-returning operations,
//!   for embedding in larger structures. This layer also exposes the
//!   hand-off operations [`transfer`] and [`veto_transfer`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use slimlock::Mutex;
//!
//! // One word per slot until a slot is actually fought over.
//! let slots: Arc<Vec<Mutex<u64>>> = Arc::new((0..1024).map(Mutex::new).collect());
//!
//! let mut handles = Vec::new();
//! for t in 0..4 {
//!     let slots = Arc::clone(&slots);
//!     handles.push(thread::spawn(move || {
//!         for i in (t..1024).step_by(4) {
//!             *slots[i].lock() += 1;
//!         }
//!     }));
//! }
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert!(slots.iter().all(|slot| *slot.lock() == 1));
//! ```
//!
//! # Features
//!
//! - `lock_api`: implements [`lock_api::RawMutex`] for the raw lock and
//!   exports `lock_api`-based `Mutex`/`MutexGuard` aliases in the crate's
//!   `lock_api` module.
//!
//! # Caveats
//!
//! - No fairness: waiters are woken in no particular order, and a barging
//!   thread can overtake parked waiters.
//! - Not recursive: a thread that re-locks a lock it already holds
//!   deadlocks.
//! - Not process-shared: the heap records are meaningful within one address
//!   space only.
//! - The holder is not recorded, so release-side misuse is detected only as
//!   far as "the lock is not held at all".
//!
//! [`SlimLock`]: crate::raw::SlimLock
//! [`transfer`]: crate::raw::SlimLock::transfer
//! [`veto_transfer`]: crate::raw::SlimLock::veto_transfer
//! [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod condvar;
mod error;
mod mutex;

pub mod raw;

#[cfg(feature = "lock_api")]
#[cfg_attr(docsrs, doc(cfg(feature = "lock_api")))]
pub mod lock_api;

#[cfg(test)]
mod test;

pub use condvar::{Condvar, WaitTimeoutResult};
pub use error::{NotOwnerError, TransferError};
pub use mutex::{Mutex, MutexGuard};
