pub mod db_pool;
pub mod executor;
pub mod guard;
pub mod schema;

use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum DbError {
    PoolError(String),
    QueryError(String),
    Timeout(u64),
    TaskError(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbError::PoolError(msg) => write!(f, "Database connection error: {}", msg),
            DbError::QueryError(msg) => write!(f, "{}", msg),
            DbError::Timeout(secs) => write!(f, "Query did not finish within {}s", secs),
            DbError::TaskError(msg) => write!(f, "Database task failed: {}", msg),
        }
    }
}

impl Error for DbError {}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::QueryError(err.to_string())
    }
}

impl From<r2d2::Error> for DbError {
    fn from(err: r2d2::Error) -> Self {
        DbError::PoolError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::TaskError(err.to_string())
    }
}
