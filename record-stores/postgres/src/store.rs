//! Contains a [`Store`] implementation using PostgreSQL
//! as backend data source for balance records.
//!
//! [`Store`]: optimistic_lock::Store

use async_trait::async_trait;

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::{Row, Socket};

use optimistic_lock::store::{Fetcher, Updater};
use optimistic_lock::{Record, Version, INITIAL_VERSION};

const CREATE_BALANCE: &str =
    "INSERT INTO balances (amount, version) VALUES ($1, $2) RETURNING id, amount, version";

const FETCH_BALANCE: &str = "SELECT id, amount, version FROM balances WHERE id = $1";

const UPDATE_BALANCE: &str =
    "UPDATE balances SET amount = $1, version = $2 WHERE id = $3 AND version = $4";

/// Error type returned by the [`RecordStore`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error variant returned when a connection could not be checked out
    /// from the pool.
    #[error("failed to get a connection from the pool: {0}")]
    Pool(#[source] bb8::RunError<tokio_postgres::Error>),

    /// Error variant returned when the database returned an error.
    #[error("db returned an error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Error variant returned when a row holds a negative version.
    #[error("balance {id} holds a negative version: {version}")]
    NegativeVersion {
        /// Identifier of the balance.
        id: i64,
        /// The version found in the row.
        version: i64,
    },

    /// Error variant returned when a version does not fit in the `version` column.
    #[error("version {0} does not fit in the version column")]
    VersionOutOfRange(Version),
}

impl From<bb8::RunError<tokio_postgres::Error>> for Error {
    fn from(err: bb8::RunError<tokio_postgres::Error>) -> Self {
        match err {
            bb8::RunError::User(err) => Error::Database(err),
            err => Error::Pool(err),
        }
    }
}

/// Record Store of balances, using a PostgreSQL backend.
///
/// This implementation uses the `tokio-postgres` crate over a `bb8`
/// connection pool. The `balances` table must exist: run
/// [`migrate`][crate::migrate] on the pool first.
#[derive(Clone)]
pub struct RecordStore<Tls>
where
    Tls: MakeTlsConnect<Socket> + Clone + Send + Sync + 'static,
    <Tls as MakeTlsConnect<Socket>>::Stream: Send + Sync,
    <Tls as MakeTlsConnect<Socket>>::TlsConnect: Send,
    <<Tls as MakeTlsConnect<Socket>>::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    pool: Pool<PostgresConnectionManager<Tls>>,
}

impl<Tls> From<Pool<PostgresConnectionManager<Tls>>> for RecordStore<Tls>
where
    Tls: MakeTlsConnect<Socket> + Clone + Send + Sync + 'static,
    <Tls as MakeTlsConnect<Socket>>::Stream: Send + Sync,
    <Tls as MakeTlsConnect<Socket>>::TlsConnect: Send,
    <<Tls as MakeTlsConnect<Socket>>::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    #[inline]
    fn from(pool: Pool<PostgresConnectionManager<Tls>>) -> Self {
        Self { pool }
    }
}

impl<Tls> RecordStore<Tls>
where
    Tls: MakeTlsConnect<Socket> + Clone + Send + Sync + 'static,
    <Tls as MakeTlsConnect<Socket>>::Stream: Send + Sync,
    <Tls as MakeTlsConnect<Socket>>::TlsConnect: Send,
    <<Tls as MakeTlsConnect<Socket>>::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    /// Seeds a new balance with the specified amount, returning it
    /// with its newly assigned identifier.
    pub async fn create(&self, amount: i64) -> Result<Record<i64>, Error> {
        let initial_version = version_param(INITIAL_VERSION)?;

        let client = self.pool.get().await?;
        let row = client
            .query_one(CREATE_BALANCE, &[&amount, &initial_version])
            .await?;

        row_to_record(&row)
    }
}

fn version_param(version: Version) -> Result<i64, Error> {
    i64::try_from(version).map_err(|_| Error::VersionOutOfRange(version))
}

fn row_to_record(row: &Row) -> Result<Record<i64>, Error> {
    let id: i64 = row.try_get("id")?;
    let amount: i64 = row.try_get("amount")?;
    let version: i64 = row.try_get("version")?;

    let version =
        Version::try_from(version).map_err(|_| Error::NegativeVersion { id, version })?;

    Ok(Record::new(id, amount).with_version(version))
}

#[async_trait]
impl<Tls> Fetcher<i64> for RecordStore<Tls>
where
    Tls: MakeTlsConnect<Socket> + Clone + Send + Sync + 'static,
    <Tls as MakeTlsConnect<Socket>>::Stream: Send + Sync,
    <Tls as MakeTlsConnect<Socket>>::TlsConnect: Send,
    <<Tls as MakeTlsConnect<Socket>>::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    type Error = Error;

    async fn fetch(&self, id: &i64) -> Result<Option<Record<i64>>, Self::Error> {
        let client = self.pool.get().await?;
        let row = client.query_opt(FETCH_BALANCE, &[id]).await?;

        row.as_ref().map(row_to_record).transpose()
    }
}

#[async_trait]
impl<Tls> Updater<i64> for RecordStore<Tls>
where
    Tls: MakeTlsConnect<Socket> + Clone + Send + Sync + 'static,
    <Tls as MakeTlsConnect<Socket>>::Stream: Send + Sync,
    <Tls as MakeTlsConnect<Socket>>::TlsConnect: Send,
    <<Tls as MakeTlsConnect<Socket>>::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    type Error = Error;

    async fn conditional_update(
        &self,
        id: &i64,
        expected: Version,
        new_value: i64,
        new_version: Version,
    ) -> Result<u64, Self::Error> {
        let expected = version_param(expected)?;
        let new_version = version_param(new_version)?;

        let client = self.pool.get().await?;
        let rows_affected = client
            .execute(UPDATE_BALANCE, &[&new_value, &new_version, id, &expected])
            .await?;

        Ok(rows_affected)
    }
}
