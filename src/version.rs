//! Contains the types necessary for Optimistic Locking through versioning.

/// A version used for Optimistic Locking.
///
/// Carried by every [`Record`][crate::record::Record] and used by the
/// [Store][crate::store::Store] as the guard of a conditional write.
pub type Version = u64;

/// The [Version] a [`Record`][crate::record::Record] is seeded with.
pub const INITIAL_VERSION: Version = 1;

/// This error is returned when a conditional write guarded by a [Version]
/// did not take effect, because another writer committed first.
///
/// Only the expected [Version] is known: the conflict is detected from the
/// number of rows affected by the write, the record is never read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("conflict error detected, record was updated by another writer since version: {expected}")]
pub struct ConflictError {
    /// The [Version] that was observed before attempting the write.
    pub expected: Version,
}
