//! Database pool bootstrap with retry-until-available.

use std::time::Duration;

use common::Backoff;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connects to Postgres and verifies the connection with a probe query,
/// retrying forever on exponential backoff.
///
/// Connectivity failures are recovered locally, never surfaced: the process
/// waits for the database rather than exiting, both at warm-up and when a
/// caller rebuilds its pool after a fatal mid-loop error.
pub async fn connect_with_retry(database_url: &str) -> PgPool {
    let mut backoff = Backoff::for_connect();
    loop {
        match try_connect(database_url).await {
            Ok(pool) => {
                tracing::info!("database ready");
                return pool;
            }
            Err(err) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    error = %err,
                    retry_in_secs = delay.as_secs(),
                    "database connect failed"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_connect(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    // Health probe: a pool can be created lazily against a dead server.
    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}
