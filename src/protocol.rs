//! Contains the optimistic update protocol: read the current [Record],
//! compute its next state and write it back only if nobody else did in between.
//!
//! [Record]: crate::record::Record

use async_trait::async_trait;

use crate::store::Store;
use crate::version::ConflictError;

/// All possible failures of an [`Apply::apply`] call.
///
/// A failed call always leaves the Record Store unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// The identifier does not resolve to an existing record.
    #[error("record was not found")]
    NotFound,

    /// Another writer committed between the read and the conditional write.
    #[error("failed to apply delta: {0}")]
    Conflict(#[source] ConflictError),

    /// Every attempt allowed by the retry policy ended in a conflict.
    #[error("failed to apply delta, retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The conflict observed by the last attempt.
        #[source]
        last: ConflictError,
    },

    /// The update was aborted by a cancellation signal before it could commit.
    #[error("update was cancelled before committing")]
    Cancelled,

    /// Adding the delta to the current value would overflow.
    #[error("adding {delta} to {value} overflows")]
    ValueOverflow {
        /// The value read from the store.
        value: i64,
        /// The delta that was requested.
        delta: i64,
    },

    /// The Record Store returned an error, or broke its contract.
    #[error("record store failed: {0}")]
    Store(#[source] anyhow::Error),
}

/// A protocol that applies a delta to a versioned record.
#[async_trait]
pub trait Apply<Id>: Send + Sync
where
    Id: Send + Sync,
{
    /// Adds `delta` to the value of the record with the specified identifier,
    /// bumping its version by one.
    async fn apply(&self, id: &Id, delta: i64) -> Result<(), ApplyError>;
}

/// Runs a single read-mutate-conditional-write cycle against the store.
///
/// The number of rows affected by the conditional write is the only
/// thing that decides between commit and conflict.
pub async fn attempt<S, Id>(store: &S, id: &Id, delta: i64) -> Result<(), ApplyError>
where
    S: Store<Id> + ?Sized,
    Id: Clone + Send + Sync,
{
    let record = store
        .fetch(id)
        .await
        .map_err(|err| ApplyError::Store(err.into()))?
        .ok_or(ApplyError::NotFound)?;

    let expected = record.version;
    let next = record.next(delta).ok_or(ApplyError::ValueOverflow {
        value: record.value,
        delta,
    })?;

    let rows_affected = store
        .conditional_update(id, expected, next.value, next.version)
        .await
        .map_err(|err| ApplyError::Store(err.into()))?;

    match rows_affected {
        0 => Err(ApplyError::Conflict(ConflictError { expected })),
        1 => Ok(()),
        n => Err(ApplyError::Store(anyhow::anyhow!(
            "conditional update affected {} rows, expected at most one",
            n
        ))),
    }
}

/// The single-attempt optimistic update protocol.
///
/// A conflict is surfaced to the caller right away: use
/// [`Retrying`][crate::retry::Retrying] to try again automatically.
#[derive(Debug, Clone)]
pub struct Optimistic<S> {
    store: S,
}

impl<S> From<S> for Optimistic<S> {
    fn from(store: S) -> Self {
        Self { store }
    }
}

impl<S> Optimistic<S> {
    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S, Id> Apply<Id> for Optimistic<S>
where
    S: Store<Id>,
    Id: Clone + Send + Sync,
{
    async fn apply(&self, id: &Id, delta: i64) -> Result<(), ApplyError> {
        attempt(&self.store, id, delta).await
    }
}
