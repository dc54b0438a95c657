use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::db::DbError;
use crate::db::db_pool::DbPool;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    /// One object per row, keyed by column name in select order
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

/// Runs `sql` inside a transaction that is always rolled back, so nothing the
/// statement does outlives the call.
pub fn execute_on(conn: &mut Connection, sql: &str) -> Result<QueryResult, DbError> {
    let start_time = Instant::now();
    let tx = conn.transaction()?;

    let (columns, record_batches) = {
        let mut stmt = tx.prepare(sql)?;
        let arrow_batch = stmt.query_arrow([])?;
        let schema = arrow_batch.get_schema();

        let columns = schema
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect::<Vec<String>>();

        (columns, arrow_batch.collect::<Vec<RecordBatch>>())
    };

    tx.rollback()?;

    let rows = batches_to_rows(&record_batches)?;
    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    debug!("Materialized {} rows in {}ms", rows.len(), execution_time_ms);

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        execution_time_ms,
    })
}

fn batches_to_rows(record_batches: &[RecordBatch]) -> Result<Vec<Map<String, Value>>, DbError> {
    if record_batches.iter().all(|batch| batch.num_rows() == 0) {
        return Ok(Vec::new());
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());

    let batches: Vec<&RecordBatch> = record_batches.iter().collect();
    writer
        .write_batches(&batches)
        .map_err(|e| DbError::QueryError(format!("Failed to convert result rows: {}", e)))?;
    writer
        .finish()
        .map_err(|e| DbError::QueryError(format!("Failed to convert result rows: {}", e)))?;

    serde_json::from_slice(&writer.into_inner())
        .map_err(|e| DbError::QueryError(format!("Failed to convert result rows: {}", e)))
}

/// Executes on a pooled connection in a blocking task, bounded by `timeout`.
///
/// The connection goes back to the pool when the task finishes, whichever way
/// it ends.
pub async fn execute(pool: &DbPool, sql: &str, timeout: Duration) -> Result<QueryResult, DbError> {
    info!("Executing SQL: {}", sql);

    let pool = pool.clone();
    let sql_to_execute = sql.to_string();
    let blocking_task = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        execute_on(&mut conn, &sql_to_execute)
    });

    match tokio::time::timeout(timeout, blocking_task).await {
        Ok(join_result) => join_result?,
        Err(_) => {
            // The engine keeps the statement until it completes; only the caller stops waiting
            warn!("Query exceeded {}s timeout", timeout.as_secs());
            Err(DbError::Timeout(timeout.as_secs()))
        }
    }
}
