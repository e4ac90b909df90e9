//! Status errors reported by lock operations.

use thiserror::Error;

/// The calling thread does not hold the lock.
///
/// Returned by release and wait operations invoked without the lock held,
/// including on a lock that is not held by anyone at all. The lock itself
/// keeps no record of which thread holds it, so a release racing with the
/// true owner's release is reported the same way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("lock is not held by the calling thread")]
pub struct NotOwnerError;

/// A hand-off between two locks failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The source lock is not held by the calling thread.
    #[error("source lock is not held by the calling thread")]
    NotOwner,
    /// The holder of the target lock vetoed the hand-off; the caller still
    /// holds the source lock.
    #[error("hand-off vetoed by the target lock's holder")]
    Vetoed,
}

impl From<NotOwnerError> for TransferError {
    fn from(_: NotOwnerError) -> Self {
        Self::NotOwner
    }
}
