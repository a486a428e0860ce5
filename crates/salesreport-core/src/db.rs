use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

use crate::config::DatabaseConfig;

pub type DbPool = Pool<Postgres>;

/// Establish a Postgres connection pool for the report's read-only queries.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    let url = config
        .url
        .as_deref()
        .context("DATABASE_URL (or SALESREPORT_DATABASE_URL) must be set")?;

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(url)
        .await
        .with_context(|| "failed to connect to Postgres")
}
