//! Module containing some extension traits to support code instrumentation
//! using the `tracing` crate.

use std::fmt::Debug;

use async_trait::async_trait;
use tracing::instrument;

use crate::protocol::{Apply, ApplyError};
use crate::record::Record;
use crate::store::{Fetcher, Store, Updater};
use crate::version::Version;

/// [Store] type wrapper that provides instrumentation
/// features through the `tracing` crate.
#[derive(Debug, Clone)]
pub struct InstrumentedStore<T> {
    store: T,
}

#[async_trait]
impl<T, Id> Fetcher<Id> for InstrumentedStore<T>
where
    T: Fetcher<Id>,
    Id: Debug + Send + Sync,
{
    type Error = <T as Fetcher<Id>>::Error;

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(name = "store::Fetcher.fetch", ret, err, skip(self))]
    async fn fetch(&self, id: &Id) -> Result<Option<Record<Id>>, Self::Error> {
        self.store.fetch(id).await
    }
}

#[async_trait]
impl<T, Id> Updater<Id> for InstrumentedStore<T>
where
    T: Updater<Id>,
    Id: Debug + Send + Sync,
{
    type Error = <T as Updater<Id>>::Error;

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(name = "store::Updater.conditional_update", ret, err, skip(self))]
    async fn conditional_update(
        &self,
        id: &Id,
        expected: Version,
        new_value: i64,
        new_version: Version,
    ) -> Result<u64, Self::Error> {
        self.store
            .conditional_update(id, expected, new_value, new_version)
            .await
    }
}

/// Extension trait for any [Store] type to provide
/// instrumentation features through the `tracing` crate.
pub trait StoreExt<Id>: Store<Id> + Sized
where
    Id: Debug + Send + Sync,
{
    /// Returns an instrumented version of the [Store] instance.
    fn with_tracing(self) -> InstrumentedStore<Self> {
        InstrumentedStore { store: self }
    }
}

impl<T, Id> StoreExt<Id> for T
where
    T: Store<Id>,
    Id: Debug + Send + Sync,
{
}

/// [Apply] type wrapper that provides instrumentation
/// features through the `tracing` crate.
#[derive(Debug, Clone)]
pub struct InstrumentedProtocol<T> {
    inner: T,
}

#[async_trait]
impl<T, Id> Apply<Id> for InstrumentedProtocol<T>
where
    T: Apply<Id>,
    Id: Debug + Send + Sync,
{
    #[allow(clippy::blocks_in_conditions)]
    #[instrument(name = "protocol::Apply.apply", err, skip(self))]
    async fn apply(&self, id: &Id, delta: i64) -> Result<(), ApplyError> {
        self.inner.apply(id, delta).await
    }
}

/// Extension trait for any [Apply] type to provide
/// instrumentation features through the `tracing` crate.
pub trait ApplyExt<Id>: Apply<Id> + Sized
where
    Id: Debug + Send + Sync,
{
    /// Returns an instrumented version of the [Apply] instance.
    fn with_tracing(self) -> InstrumentedProtocol<Self> {
        InstrumentedProtocol { inner: self }
    }
}

impl<T, Id> ApplyExt<Id> for T
where
    T: Apply<Id>,
    Id: Debug + Send + Sync,
{
}
