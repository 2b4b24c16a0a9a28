//! PostgreSQL connection pool setup.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::models::Config;

/// Build the shared connection pool from configuration.
///
/// Pool bounds come from `DB_POOL_MIN_SIZE` / `DB_POOL_MAX_SIZE`; every store
/// round trip in the engine suspends on this pool.
pub async fn init_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    let url = format!(
        "postgres://{}:{}@{}:{}/{}",
        config.db_user, config.db_password, config.db_host, config.db_port, config.db_name
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.db_pool_min_size)
        .max_connections(config.db_pool_max_size)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await?;

    info!(
        "Database pool initialized: {}@{}:{}/{} (min={}, max={})",
        config.db_user,
        config.db_host,
        config.db_port,
        config.db_name,
        config.db_pool_min_size,
        config.db_pool_max_size
    );

    Ok(pool)
}
