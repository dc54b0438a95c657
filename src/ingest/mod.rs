// Load-test result uploads: JMeter aggregate reports appended to the metrics
// table under a fresh RunId.
pub mod csv;
pub mod schema;

use duckdb::{Connection, params};
use serde::Serialize;
use std::error::Error;
use std::fmt;
use tracing::{debug, info};

use crate::db::db_pool::DbPool;
use crate::ingest::csv::{AggregateRow, UploadName, parse_aggregate_report};
use crate::ingest::schema::ensure_metrics_table;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug)]
pub enum IngestError {
    InvalidFileName(String),
    EmptyFile,
    ParsingError(String),
    DatabaseError(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::InvalidFileName(msg) => write!(f, "Incorrect file name: {}", msg),
            IngestError::EmptyFile => write!(f, "The uploaded file has no result rows"),
            IngestError::ParsingError(msg) => write!(f, "Parsing error: {}", msg),
            IngestError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl Error for IngestError {}

impl From<duckdb::Error> for IngestError {
    fn from(err: duckdb::Error) -> Self {
        IngestError::DatabaseError(err.to_string())
    }
}

impl From<r2d2::Error> for IngestError {
    fn from(err: r2d2::Error) -> Self {
        IngestError::DatabaseError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSummary {
    pub run_id: i32,
    pub rows_inserted: usize,
    pub test_name: String,
}

/// One past run, newest first in [`IngestManager::recent_runs`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub run_id: i32,
    pub test_name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub labels: i64,
}

#[derive(Clone)]
pub struct IngestManager {
    pool: DbPool,
    table: String,
}

impl IngestManager {
    pub fn new(pool: DbPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
        }
    }

    /// Validates and stores one upload. Every row of the file, including the
    /// TOTAL line, lands under the same new RunId, or none does.
    pub async fn ingest_upload(&self, file_name: &str, bytes: &[u8]) -> Result<IngestSummary, IngestError> {
        let name = UploadName::parse(file_name)?;
        let rows = parse_aggregate_report(bytes)?;
        debug!("Parsed {} rows from {}", rows.len(), file_name);

        let pool = self.pool.clone();
        let table = self.table.clone();
        let summary = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            insert_run(&mut conn, &table, &name, &rows)
        })
        .await
        .map_err(|e| IngestError::DatabaseError(e.to_string()))??;

        info!(
            "Stored {} rows for {} as run {}",
            summary.rows_inserted, summary.test_name, summary.run_id
        );
        Ok(summary)
    }

    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>, IngestError> {
        let pool = self.pool.clone();
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            list_runs(&conn, &table, limit)
        })
        .await
        .map_err(|e| IngestError::DatabaseError(e.to_string()))?
    }
}

fn insert_run(
    conn: &mut Connection,
    table: &str,
    name: &UploadName,
    rows: &[AggregateRow],
) -> Result<IngestSummary, IngestError> {
    let schema = ensure_metrics_table(conn, table)?;
    let tx = conn.transaction()?;

    // RunId allocation and inserts share the transaction
    let run_id: i32 = tx.query_row(
        &format!("SELECT CAST(COALESCE(MAX(\"RunId\"), 0) + 1 AS INTEGER) FROM \"{}\"", table),
        [],
        |row| row.get(0),
    )?;

    let start = name.start.format(TIMESTAMP_FORMAT).to_string();
    let end = name.end.format(TIMESTAMP_FORMAT).to_string();
    {
        let mut stmt = tx.prepare(&schema.to_insert_sql())?;
        for row in rows {
            stmt.execute(params![
                row.label,
                row.samples,
                row.average,
                row.median,
                row.p90,
                row.p95,
                row.p99,
                row.min,
                row.max,
                row.error_percentage,
                row.throughput,
                row.received_kb_per_sec,
                row.std_dev,
                run_id,
                name.test_name,
                start,
                end,
            ])?;
        }
    }
    tx.commit()?;

    Ok(IngestSummary {
        run_id,
        rows_inserted: rows.len(),
        test_name: name.test_name.clone(),
    })
}

fn list_runs(conn: &Connection, table: &str, limit: usize) -> Result<Vec<RunRecord>, IngestError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT \"RunId\", \"TestName\",
                CAST(MIN(\"TestStartTime\") AS VARCHAR),
                CAST(MAX(\"TestEndTime\") AS VARCHAR),
                COUNT(*)
         FROM \"{}\"
         GROUP BY \"RunId\", \"TestName\"
         ORDER BY \"RunId\" DESC
         LIMIT {}",
        table, limit
    ))?;

    let runs = stmt
        .query_map([], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                test_name: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                labels: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::csv::fixtures::{FILE_NAME, REPORT};
    use super::*;
    use crate::db::db_pool::memory_pool;

    const TABLE: &str = "PerformanceMetrics";

    #[tokio::test]
    async fn first_upload_is_run_one() {
        let manager = IngestManager::new(memory_pool(), TABLE);

        let summary = manager.ingest_upload(FILE_NAME, REPORT.as_bytes()).await.unwrap();

        assert_eq!(
            summary,
            IngestSummary {
                run_id: 1,
                rows_inserted: 4,
                test_name: "Release2.1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn run_ids_increase_per_upload() {
        let pool = memory_pool();
        let manager = IngestManager::new(pool.clone(), TABLE);

        manager.ingest_upload(FILE_NAME, REPORT.as_bytes()).await.unwrap();
        let second = manager
            .ingest_upload("Release2.2_02-03-2024-10-00-00_02-03-2024-10-10-00.csv", REPORT.as_bytes())
            .await
            .unwrap();

        assert_eq!(second.run_id, 2);

        let conn = pool.get().unwrap();
        let (rows, p90): (i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(NinetyPercentile) FROM PerformanceMetrics WHERE RunId = 2 AND API <> 'TOTAL'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(rows, 3);
        assert_eq!(p90, 4100.0);

        let start: String = conn
            .query_row(
                "SELECT CAST(TestStartTime AS VARCHAR) FROM PerformanceMetrics WHERE RunId = 2 LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(start, "2024-03-02 10:00:00");
    }

    #[tokio::test]
    async fn rejected_uploads_store_nothing() {
        let pool = memory_pool();
        let manager = IngestManager::new(pool.clone(), TABLE);

        let bad_name = manager.ingest_upload("results.csv", REPORT.as_bytes()).await;
        let bad_body = manager.ingest_upload(FILE_NAME, b"Label,# Samples\nGET /x,abc\n").await;

        assert!(matches!(bad_name, Err(IngestError::InvalidFileName(_))));
        assert!(matches!(bad_body, Err(IngestError::ParsingError(_))));
        assert!(manager.recent_runs(10).await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn recent_runs_newest_first() {
        let manager = IngestManager::new(memory_pool(), TABLE);
        manager.ingest_upload(FILE_NAME, REPORT.as_bytes()).await.unwrap();
        manager
            .ingest_upload("Checkout_05-03-2024-09-00-00_05-03-2024-09-05-00.csv", REPORT.as_bytes())
            .await
            .unwrap();

        let runs = manager.recent_runs(10).await.unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, 2);
        assert_eq!(runs[0].test_name, "Checkout");
        assert_eq!(runs[0].start_time.as_deref(), Some("2024-03-05 09:00:00"));
        assert_eq!(runs[1].labels, 4);

        assert_eq!(manager.recent_runs(1).await.unwrap().len(), 1);
    }
}
