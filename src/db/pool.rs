use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::error::StoreError;

/// Create a PostgreSQL connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    tracing::info!("Creating database connection pool...");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    tracing::info!("Database connection pool created successfully");

    Ok(pool)
}

/// Apply embedded migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Migrations complete");
    Ok(())
}
