use duckdb::Connection;
use tracing::info;

use crate::ingest::IngestError;

#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Integer,
    Double,
    String,
    Timestamp,
}

impl DataType {
    pub fn to_sql_type(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Double => "DOUBLE",
            DataType::String => "VARCHAR",
            DataType::Timestamp => "TIMESTAMP",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnSchema {
    fn new(name: &str, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            nullable,
        }
    }

    pub fn to_sql_definition(&self) -> String {
        let nullable_str = if self.nullable { "" } else { " NOT NULL" };
        format!("\"{}\" {}{}", self.name, self.data_type.to_sql_type(), nullable_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Layout of the load-test metrics table: one row per sampler label per run.
    pub fn performance_metrics(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: vec![
                ColumnSchema::new("API", DataType::String, false),
                ColumnSchema::new("Samples", DataType::Integer, true),
                ColumnSchema::new("Average", DataType::Double, true),
                ColumnSchema::new("Median", DataType::Double, true),
                ColumnSchema::new("NinetyPercentile", DataType::Double, true),
                ColumnSchema::new("NinetyFivePercentile", DataType::Double, true),
                ColumnSchema::new("NinetyNinePercentile", DataType::Double, true),
                ColumnSchema::new("Minimum", DataType::Double, true),
                ColumnSchema::new("Maximum", DataType::Double, true),
                ColumnSchema::new("ErrorPercentage", DataType::Double, true),
                ColumnSchema::new("Throughput", DataType::Double, true),
                ColumnSchema::new("ReceivedKBPersecond", DataType::Double, true),
                ColumnSchema::new("StandardDeviation", DataType::Double, true),
                ColumnSchema::new("RunId", DataType::Integer, false),
                ColumnSchema::new("TestName", DataType::String, false),
                ColumnSchema::new("TestStartTime", DataType::Timestamp, true),
                ColumnSchema::new("TestEndTime", DataType::Timestamp, true),
            ],
        }
    }

    pub fn to_create_table_sql(&self) -> String {
        let columns_sql: Vec<String> = self
            .columns
            .iter()
            .map(|col| col.to_sql_definition())
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n);",
            self.name,
            columns_sql.join(",\n    ")
        )
    }

    /// Parameterised insert; timestamp columns take their text form.
    pub fn to_insert_sql(&self) -> String {
        let names: Vec<String> = self.columns.iter().map(|c| format!("\"{}\"", c.name)).collect();
        let placeholders: Vec<&str> = self
            .columns
            .iter()
            .map(|c| match c.data_type {
                DataType::Timestamp => "CAST(? AS TIMESTAMP)",
                _ => "?",
            })
            .collect();

        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.name,
            names.join(", "),
            placeholders.join(", ")
        )
    }
}

/// Creates the metrics table when it does not exist yet.
pub fn ensure_metrics_table(conn: &Connection, table: &str) -> Result<TableSchema, IngestError> {
    let schema = TableSchema::performance_metrics(table);
    conn.execute_batch(&schema.to_create_table_sql())
        .map_err(|e| IngestError::DatabaseError(format!("Failed to create {}: {}", table, e)))?;
    info!("Ensured metrics table {} exists", table);
    Ok(schema)
}
