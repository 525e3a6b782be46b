//! Contains the Record Store abstractions used by the update protocols,
//! and the [`std::collections::HashMap`]'s based [`InMemory`] implementation.

use std::collections::HashMap;
use std::convert::Infallible;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::record::Record;
use crate::version::Version;

/// Interface used to read a [Record] back from a Record Store.
#[async_trait]
pub trait Fetcher<Id>: Send + Sync
where
    Id: Send + Sync,
{
    /// The error type returned by the Store during a [`fetch`][Fetcher::fetch] call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Point read of a [Record] by its identifier.
    ///
    /// Returns `None` if no [Record] exists with the specified identifier.
    /// The result must reflect the latest committed write.
    async fn fetch(&self, id: &Id) -> Result<Option<Record<Id>>, Self::Error>;
}

/// Interface used to write a new state of a [Record], conditioned
/// on its current [Version].
#[async_trait]
pub trait Updater<Id>: Send + Sync
where
    Id: Send + Sync,
{
    /// The error type returned by the Store during a
    /// [`conditional_update`][Updater::conditional_update] call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sets `value` and `version` of the [Record] with the specified identifier,
    /// only if its current [Version] is still `expected`.
    ///
    /// The result of this operation is the number of rows affected:
    /// `0` when the guard did not hold, `1` when the write committed.
    /// Implementations must evaluate the guard and the write atomically
    /// with respect to concurrent callers.
    async fn conditional_update(
        &self,
        id: &Id,
        expected: Version,
        new_value: i64,
        new_version: Version,
    ) -> Result<u64, Self::Error>;
}

/// A Record Store, used to read and conditionally write [Record]s.
pub trait Store<Id>: Fetcher<Id> + Updater<Id> + Send + Sync
where
    Id: Send + Sync,
{
}

impl<T, Id> Store<Id> for T
where
    T: Fetcher<Id> + Updater<Id> + Send + Sync,
    Id: Send + Sync,
{
}

/// In-memory implementation of the [Store] trait,
/// backed by a thread-safe [`std::collections::HashMap`].
#[derive(Debug, Clone)]
pub struct InMemory<Id> {
    backend: Arc<RwLock<HashMap<Id, Record<Id>>>>,
}

impl<Id> Default for InMemory<Id> {
    fn default() -> Self {
        Self {
            backend: Arc::default(),
        }
    }
}

impl<Id> InMemory<Id>
where
    Id: Clone + Eq + Hash,
{
    /// Seeds the store with the specified [Record], replacing any
    /// [Record] that was using the same identifier.
    pub fn insert(&self, record: Record<Id>) {
        self.backend.write().insert(record.id.clone(), record);
    }

    /// Returns a copy of the [Record] currently stored, if any.
    pub fn get(&self, id: &Id) -> Option<Record<Id>> {
        self.backend.read().get(id).cloned()
    }

    /// Removes the [Record] from the store, returning it if it was present.
    pub fn remove(&self, id: &Id) -> Option<Record<Id>> {
        self.backend.write().remove(id)
    }
}

#[async_trait]
impl<Id> Fetcher<Id> for InMemory<Id>
where
    Id: Clone + Eq + Hash + Send + Sync,
{
    type Error = Infallible;

    async fn fetch(&self, id: &Id) -> Result<Option<Record<Id>>, Self::Error> {
        Ok(self.get(id))
    }
}

#[async_trait]
impl<Id> Updater<Id> for InMemory<Id>
where
    Id: Clone + Eq + Hash + Send + Sync,
{
    type Error = Infallible;

    async fn conditional_update(
        &self,
        id: &Id,
        expected: Version,
        new_value: i64,
        new_version: Version,
    ) -> Result<u64, Self::Error> {
        let mut backend = self.backend.write();

        match backend.get_mut(id) {
            Some(record) if record.version == expected => {
                record.value = new_value;
                record.version = new_version;
                Ok(1)
            },
            _ => Ok(0),
        }
    }
}

/// A conditional write that went through a [Tracking] store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAttempt<Id> {
    /// Identifier of the target [Record].
    pub id: Id,
    /// The [Version] the write was guarded by.
    pub expected: Version,
    /// The value the write tried to set.
    pub new_value: i64,
    /// The [Version] the write tried to set.
    pub new_version: Version,
    /// Rows affected, as reported by the decorated store.
    pub rows_affected: u64,
}

/// Decorator type for a [Store] implementation that tracks the reads
/// and the conditional writes going through it.
///
/// Useful for testing purposes, i.e. asserting how many attempts
/// an update protocol made, and with which expectations.
#[derive(Debug, Clone)]
pub struct Tracking<T, Id> {
    store: T,
    fetches: Arc<RwLock<Vec<Option<Record<Id>>>>>,
    attempts: Arc<RwLock<Vec<UpdateAttempt<Id>>>>,
}

impl<T, Id> Tracking<T, Id>
where
    Id: Clone,
{
    /// Returns the results of every [`fetch`][Fetcher::fetch] recorded so far.
    pub fn recorded_fetches(&self) -> Vec<Option<Record<Id>>> {
        self.fetches.read().clone()
    }

    /// Returns every conditional write recorded so far, failed ones included.
    pub fn recorded_attempts(&self) -> Vec<UpdateAttempt<Id>> {
        self.attempts.read().clone()
    }

    /// Resets the lists of recorded reads and writes.
    pub fn reset(&self) {
        self.fetches.write().clear();
        self.attempts.write().clear();
    }
}

#[async_trait]
impl<T, Id> Fetcher<Id> for Tracking<T, Id>
where
    T: Store<Id>,
    Id: Clone + Send + Sync,
{
    type Error = <T as Fetcher<Id>>::Error;

    async fn fetch(&self, id: &Id) -> Result<Option<Record<Id>>, Self::Error> {
        let record = self.store.fetch(id).await?;
        self.fetches.write().push(record.clone());

        Ok(record)
    }
}

#[async_trait]
impl<T, Id> Updater<Id> for Tracking<T, Id>
where
    T: Store<Id>,
    Id: Clone + Send + Sync,
{
    type Error = <T as Updater<Id>>::Error;

    async fn conditional_update(
        &self,
        id: &Id,
        expected: Version,
        new_value: i64,
        new_version: Version,
    ) -> Result<u64, Self::Error> {
        let rows_affected = self
            .store
            .conditional_update(id, expected, new_value, new_version)
            .await?;

        self.attempts.write().push(UpdateAttempt {
            id: id.clone(),
            expected,
            new_value,
            new_version,
            rows_affected,
        });

        Ok(rows_affected)
    }
}

/// Extension trait that can be used to pull in supertypes implemented
/// in this module.
pub trait StoreExt<Id>: Store<Id> + Sized
where
    Id: Clone + Send + Sync,
{
    /// Returns a [Tracking] instance that decorates the original [Store]
    /// instance this method has been called on.
    fn with_tracking(self) -> Tracking<Self, Id> {
        Tracking {
            store: self,
            fetches: Arc::default(),
            attempts: Arc::default(),
        }
    }
}

impl<T, Id> StoreExt<Id> for T
where
    T: Store<Id>,
    Id: Clone + Send + Sync,
{
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::version::INITIAL_VERSION;

    const RECORD_ID: &str = "balance:1";

    fn seeded_store() -> InMemory<&'static str> {
        let store = InMemory::default();
        store.insert(Record::new(RECORD_ID, 1000));
        store
    }

    #[tokio::test]
    async fn fetch_returns_none_for_unknown_records() {
        let store = InMemory::<&'static str>::default();

        let record = store.fetch(&"unknown").await.expect("fetch never fails");

        assert_eq!(None, record);
    }

    #[tokio::test]
    async fn conditional_update_applies_when_version_matches() {
        let store = seeded_store();

        let rows = store
            .conditional_update(&RECORD_ID, INITIAL_VERSION, 1010, INITIAL_VERSION + 1)
            .await
            .expect("conditional update never fails");

        assert_eq!(1, rows);
        assert_eq!(
            Some(Record::new(RECORD_ID, 1010).with_version(INITIAL_VERSION + 1)),
            store.get(&RECORD_ID)
        );
    }

    #[tokio::test]
    async fn only_one_writer_wins_for_the_same_expected_version() {
        let store = seeded_store();

        let first = store
            .conditional_update(&RECORD_ID, INITIAL_VERSION, 1010, INITIAL_VERSION + 1)
            .await
            .expect("conditional update never fails");

        let second = store
            .conditional_update(&RECORD_ID, INITIAL_VERSION, 1005, INITIAL_VERSION + 1)
            .await
            .expect("conditional update never fails");

        assert_eq!((1, 0), (first, second));
        assert_eq!(Some(1010), store.get(&RECORD_ID).map(|r| r.value));
    }

    #[tokio::test]
    async fn conditional_update_on_missing_record_affects_nothing() {
        let store = InMemory::<&'static str>::default();

        let rows = store
            .conditional_update(&RECORD_ID, INITIAL_VERSION, 10, INITIAL_VERSION + 1)
            .await
            .expect("conditional update never fails");

        assert_eq!(0, rows);
        assert_eq!(None, store.get(&RECORD_ID));
    }

    #[tokio::test]
    async fn removed_records_can_no_longer_be_read_or_updated() {
        let store = seeded_store();

        assert_eq!(Some(Record::new(RECORD_ID, 1000)), store.remove(&RECORD_ID));
        assert_eq!(None, store.remove(&RECORD_ID));

        let record = store.fetch(&RECORD_ID).await.expect("fetch never fails");
        assert_eq!(None, record);

        let rows = store
            .conditional_update(&RECORD_ID, INITIAL_VERSION, 1010, INITIAL_VERSION + 1)
            .await
            .expect("conditional update never fails");
        assert_eq!(0, rows);
    }

    #[tokio::test]
    async fn tracking_store_records_reads_and_writes() {
        let store = seeded_store().with_tracking();

        let record = store
            .fetch(&RECORD_ID)
            .await
            .expect("fetch never fails")
            .expect("record was seeded");

        store
            .conditional_update(&RECORD_ID, record.version + 5, 0, record.version + 6)
            .await
            .expect("conditional update never fails");

        assert_eq!(vec![Some(record)], store.recorded_fetches());
        assert_eq!(
            vec![UpdateAttempt {
                id: RECORD_ID,
                expected: INITIAL_VERSION + 5,
                new_value: 0,
                new_version: INITIAL_VERSION + 6,
                rows_affected: 0,
            }],
            store.recorded_attempts()
        );

        store.reset();
        assert!(store.recorded_attempts().is_empty());
        assert!(store.recorded_fetches().is_empty());
    }
}
