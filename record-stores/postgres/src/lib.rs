//! [`optimistic_lock`] type implementations for PostgreSQL.
//!
//! ## Record Store
//!
//! This crate includes a [`RecordStore`] implementation using PostgreSQL
//! as backend data source, over a `bb8` connection pool.
//!
//! Example usage:
//!
//! ```no_run
//! # async fn dox() -> anyhow::Result<()> {
//! use bb8::Pool;
//! use bb8_postgres::PostgresConnectionManager;
//! use envconfig::Envconfig;
//! use optimistic_lock::{Apply, Retrying};
//! use optimistic_lock_postgres::config::Config;
//! use optimistic_lock_postgres::RecordStore;
//!
//! let config = Config::init_from_env()?;
//!
//! let manager =
//!     PostgresConnectionManager::new_from_stringlike(config.postgres_dsn(), tokio_postgres::NoTls)?;
//! let pool = config.pool_builder().build(manager).await?;
//!
//! // Make sure the balances table exists before using the store.
//! optimistic_lock_postgres::migrate(&pool).await?;
//!
//! let store = RecordStore::from(pool);
//! let balance = store.create(1000).await?;
//!
//! Retrying::new(store, config.retry_policy())
//!     .apply(&balance.id, 10)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code, unused_qualifications, trivial_casts, missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod store;

pub use store::{Error, RecordStore};

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::Socket;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Error returned by [`migrate`].
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Error variant returned when a connection could not be checked out
    /// from the pool.
    #[error("failed to get a connection from the pool: {0}")]
    Pool(#[from] bb8::RunError<tokio_postgres::Error>),

    /// Error variant returned when a migration failed to apply.
    #[error("failed to run database migrations: {0}")]
    Migrate(#[from] refinery::Error),
}

/// Runs the embedded schema migrations, creating the `balances` table
/// used by the [`RecordStore`] when missing.
pub async fn migrate<Tls>(pool: &Pool<PostgresConnectionManager<Tls>>) -> Result<(), MigrationError>
where
    Tls: MakeTlsConnect<Socket> + Clone + Send + Sync + 'static,
    <Tls as MakeTlsConnect<Socket>>::Stream: Send + Sync,
    <Tls as MakeTlsConnect<Socket>>::TlsConnect: Send,
    <<Tls as MakeTlsConnect<Socket>>::TlsConnect as TlsConnect<Socket>>::Future: Send,
{
    let mut conn = pool.get().await?;
    let report = embedded::migrations::runner()
        .run_async(&mut *conn)
        .await?;

    tracing::info!(
        applied = report.applied_migrations().len(),
        "database migrations completed"
    );

    Ok(())
}
