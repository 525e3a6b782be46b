//! Environment configuration for services using the PostgreSQL [`RecordStore`].
//!
//! [`RecordStore`]: crate::RecordStore

use std::num::NonZeroU32;
use std::time::Duration;

use bb8::Builder;
use bb8_postgres::PostgresConnectionManager;
use envconfig::Envconfig;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};
use tokio_postgres::Socket;

use optimistic_lock::RetryPolicy;

/// Connection, pool and retry settings, read from the environment.
#[derive(Debug, Clone, Envconfig)]
pub struct Config {
    /// Hostname of the PostgreSQL server.
    #[envconfig(from = "DB_HOST", default = "localhost")]
    pub db_host: String,

    /// Port of the PostgreSQL server.
    #[envconfig(from = "DB_PORT", default = "5432")]
    pub db_port: u16,

    /// User to connect as.
    #[envconfig(from = "DB_USER", default = "postgres")]
    pub db_user: String,

    /// Password of [`Config::db_user`].
    #[envconfig(from = "DB_PASSWORD", default = "postgres")]
    pub db_password: String,

    /// Name of the database holding the `balances` table.
    #[envconfig(from = "DB_NAME", default = "optimistic_lock")]
    pub db_name: String,

    /// libpq `sslmode` connection parameter.
    #[envconfig(from = "DB_SSLMODE", default = "disable")]
    pub db_sslmode: String,

    /// Maximum number of connections held by the pool.
    #[envconfig(from = "DB_MAX_OPEN_CONNS", default = "100")]
    pub db_max_open_conns: NonZeroU32,

    /// Number of idle connections the pool tries to keep around.
    #[envconfig(from = "DB_MAX_IDLE_CONNS", default = "25")]
    pub db_max_idle_conns: u32,

    /// Lifetime of a pooled connection, in seconds.
    #[envconfig(from = "DB_CONN_MAX_LIFETIME_SECS", default = "300")]
    pub db_conn_max_lifetime_secs: u64,

    /// Time after which an idle pooled connection is closed, in seconds.
    #[envconfig(from = "DB_CONN_MAX_IDLE_SECS", default = "30")]
    pub db_conn_max_idle_secs: u64,

    /// Maximum number of attempts of the retrying protocol.
    #[envconfig(from = "RETRY_MAX_ATTEMPTS", default = "5")]
    pub retry_max_attempts: NonZeroU32,

    /// Base backoff of the retrying protocol, in milliseconds.
    #[envconfig(from = "RETRY_BASE_BACKOFF_MS", default = "10")]
    pub retry_base_backoff_ms: u64,
}

impl Config {
    /// Returns the key-value connection string for `tokio-postgres`.
    #[must_use]
    pub fn postgres_dsn(&self) -> String {
        format!(
            "host={} user={} dbname={} password={} port={} sslmode={}",
            self.db_host,
            self.db_user,
            self.db_name,
            self.db_password,
            self.db_port,
            self.db_sslmode
        )
    }

    /// Returns a pool builder sized after the pool settings.
    ///
    /// The number of idle connections is capped to the pool size.
    #[must_use]
    pub fn pool_builder<Tls>(&self) -> Builder<PostgresConnectionManager<Tls>>
    where
        Tls: MakeTlsConnect<Socket> + Clone + Send + Sync + 'static,
        <Tls as MakeTlsConnect<Socket>>::Stream: Send + Sync,
        <Tls as MakeTlsConnect<Socket>>::TlsConnect: Send,
        <<Tls as MakeTlsConnect<Socket>>::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let max_size = self.db_max_open_conns.get();

        Builder::new()
            .max_size(max_size)
            .min_idle(Some(self.db_max_idle_conns.min(max_size)))
            .max_lifetime(Some(Duration::from_secs(self.db_conn_max_lifetime_secs)))
            .idle_timeout(Some(Duration::from_secs(self.db_conn_max_idle_secs)))
    }

    /// Returns the [`RetryPolicy`] to use with the retrying protocol.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_base_backoff_ms),
        )
    }
}
