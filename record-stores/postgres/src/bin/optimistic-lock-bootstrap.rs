use bb8_postgres::PostgresConnectionManager;

use envconfig::Envconfig;

use tokio_postgres::NoTls;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use optimistic_lock_postgres::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = Config::init_from_env()?;

    // Build the connection pool for communication with Postgres.
    let pg_manager = PostgresConnectionManager::new_from_stringlike(config.postgres_dsn(), NoTls)?;
    let pool = config.pool_builder().build(pg_manager).await?;

    tracing::info!(
        host = %config.db_host,
        database = %config.db_name,
        "successfully connected to the database"
    );

    optimistic_lock_postgres::migrate(&pool).await?;

    let policy = config.retry_policy();
    tracing::info!(
        max_attempts = policy.max_attempts(),
        base_backoff = ?policy.base_backoff(),
        "migration completed, balances are ready for optimistic updates"
    );

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .try_init()?;

    Ok(())
}
