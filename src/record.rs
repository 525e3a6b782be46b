//! Contains the [Record] type, the unit of optimistic concurrency control.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::version::{Version, INITIAL_VERSION};

/// A numeric record (e.g. a balance) tagged with a [Version].
///
/// The [Version] increases by exactly one on every successful write,
/// and the pair `(id, version)` identifies the state a writer expects
/// to find when its conditional write is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Record<Id> {
    /// Unique identifier of the record, never changes after creation.
    pub id: Id,
    /// The mutable quantity held by the record.
    pub value: i64,
    /// The concurrency token of the record.
    pub version: Version,
}

impl<Id> Record<Id> {
    /// Creates a new record with the [initial version][INITIAL_VERSION].
    pub fn new(id: Id, value: i64) -> Self {
        Self {
            id,
            value,
            version: INITIAL_VERSION,
        }
    }

    /// Replaces the [Version] of the record.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Returns the state this record transitions to once `delta` is applied.
    ///
    /// Returns `None` if the new value, or the new version, would overflow.
    pub fn next(&self, delta: i64) -> Option<Self>
    where
        Id: Clone,
    {
        Some(Self {
            id: self.id.clone(),
            value: self.value.checked_add(delta)?,
            version: self.version.checked_add(1)?,
        })
    }
}
