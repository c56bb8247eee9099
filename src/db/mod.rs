//! PostgreSQL bootstrap for the ledger
//!
//! Builds the pool, applies the embedded migrations and hands back a ready
//! [`PgLedger`].

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::Config;
use crate::store::PgLedger;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("DATABASE_URL is not configured")]
    NotConfigured,

    #[error("Failed to connect to database: {0}")]
    ConnectionError(String),

    #[error("Failed to run migrations: {0}")]
    MigrationError(String),
}

/// Connect, migrate and wrap the pool in the ledger store.
pub async fn open_ledger(config: &Config) -> Result<PgLedger, DbError> {
    let pool = create_pool(config).await?;
    run_migrations(&pool).await?;
    Ok(PgLedger::new(pool))
}

pub async fn create_pool(config: &Config) -> Result<PgPool, DbError> {
    let url = config.database_url.as_deref().ok_or(DbError::NotConfigured)?;
    tracing::info!(url = %config.database_url_masked(), "Opening ledger connection pool");

    // Sweeper and dispatcher each hold a connection while the API serves requests
    let max_connections = config.db_max_connections.max(3);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect(url)
        .await
        .map_err(|e| DbError::ConnectionError(e.to_string()))
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::MigrationError(e.to_string()))?;

    tracing::info!("Ledger schema is up to date");
    Ok(())
}
