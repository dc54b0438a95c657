use duckdb::Connection;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

use crate::db::DbError;
use crate::db::db_pool::DbPool;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnType {
    pub name: String,
    pub data_type: String,
}

/// Column name to declared type for one table, in ordinal order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDescription {
    pub table: String,
    pub columns: Vec<ColumnType>,
}

impl SchemaDescription {
    pub fn empty(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Reads the live column list of `table` from `information_schema`.
///
/// A table that does not exist yields an empty description, not an error.
pub fn describe_schema(conn: &Connection, table: &str) -> Result<SchemaDescription, DbError> {
    let mut stmt = conn.prepare(
        "SELECT column_name, data_type
         FROM information_schema.columns
         WHERE table_name = ?
         ORDER BY table_schema, ordinal_position",
    )?;

    let rows = stmt.query_map([table], |row| {
        Ok(ColumnType {
            name: row.get::<_, String>(0)?,
            data_type: row.get::<_, String>(1)?,
        })
    })?;

    // The same table name may exist in more than one schema; first one wins
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for column in rows {
        let column = column?;
        if seen.insert(column.name.clone()) {
            columns.push(column);
        }
    }

    debug!("Described {} columns for table {}", columns.len(), table);

    Ok(SchemaDescription {
        table: table.to_string(),
        columns,
    })
}

/// Acquires a pooled connection for the duration of one metadata read.
pub async fn describe_schema_pooled(pool: &DbPool, table: &str) -> Result<SchemaDescription, DbError> {
    let pool = pool.clone();
    let table = table.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        describe_schema(&conn, &table)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::db_pool::memory_pool;

    #[test]
    fn columns_come_back_in_declaration_order() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE PerformanceMetrics (API VARCHAR, NinetyPercentile DOUBLE, RunId INTEGER)",
        )
        .unwrap();

        let schema = describe_schema(&conn, "PerformanceMetrics").unwrap();

        let columns: Vec<(&str, &str)> = schema
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.data_type.as_str()))
            .collect();
        assert_eq!(
            columns,
            vec![("API", "VARCHAR"), ("NinetyPercentile", "DOUBLE"), ("RunId", "INTEGER")]
        );
    }

    #[test]
    fn unknown_table_is_empty_not_an_error() {
        let conn = Connection::open_in_memory().unwrap();

        let schema = describe_schema(&conn, "DoesNotExist").unwrap();

        assert!(schema.is_empty());
        assert_eq!(schema.table, "DoesNotExist");
    }

    #[tokio::test]
    async fn new_columns_show_up_on_the_next_call() {
        let pool = memory_pool();
        pool.get()
            .unwrap()
            .execute_batch("CREATE TABLE runs (RunId INTEGER)")
            .unwrap();

        let before = describe_schema_pooled(&pool, "runs").await.unwrap();
        pool.get()
            .unwrap()
            .execute_batch("ALTER TABLE runs ADD COLUMN TestName VARCHAR")
            .unwrap();
        let after = describe_schema_pooled(&pool, "runs").await.unwrap();

        assert_eq!(before.columns.len(), 1);
        assert_eq!(after.columns.len(), 2);
        assert_eq!(
            after.columns[1],
            ColumnType {
                name: "TestName".to_string(),
                data_type: "VARCHAR".to_string(),
            }
        );
    }
}
