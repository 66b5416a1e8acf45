//! Connection pool and schema migrations.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use docshift_core::Config;

/// Workspace migrations, embedded at build time.
static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Connect to the database and bring its schema up to date.
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    let pool = connect(config).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn connect(config: &Config) -> Result<PgPool> {
    tracing::info!(
        max_connections = config.db_max_connections,
        timeout_secs = config.db_timeout_seconds,
        "Connecting to database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    let known = MIGRATOR.iter().count();
    MIGRATOR
        .run(pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!(known_migrations = known, "Database schema up to date");
    Ok(())
}
