use duckdb::{Config, DuckdbConnectionManager};
use r2d2::Pool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::db::DbError;

/// Every pooled connection is a clone of one DuckDB instance, since DuckDB
/// allows a single instance per database file per process.
pub type DbPool = Pool<DuckdbConnectionManager>;

/// Engine settings shared by every pool. File access from SQL is switched
/// off: `read_csv`, `FROM 'path'` scans and `COPY` all fail inside the engine.
fn engine_config() -> Result<Config, duckdb::Error> {
    Config::default().enable_external_access(false)
}

fn manager_for(connection_string: &str) -> Result<DuckdbConnectionManager, duckdb::Error> {
    if connection_string == ":memory:" {
        DuckdbConnectionManager::memory_with_flags(engine_config()?)
    } else {
        DuckdbConnectionManager::file_with_flags(connection_string, engine_config()?)
    }
}

pub fn build_pool(config: &DatabaseConfig) -> Result<DbPool, DbError> {
    info!(
        "Opening DuckDB at {} with pool size {}",
        config.connection_string, config.pool_size
    );
    let manager = manager_for(&config.connection_string)?;

    let pool = Pool::builder()
        .max_size(config.pool_size.max(1) as u32)
        .build(manager)?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) fn memory_pool() -> DbPool {
    let manager = manager_for(":memory:").unwrap();
    Pool::builder().max_size(2).build(manager).unwrap()
}
