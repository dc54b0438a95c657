//! One natural-language question in, one audited answer out.
//!
//! Each turn reads the live schema, asks the model for SQL, checks the
//! statement is read-only and runs it. Nothing is carried between turns.

use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::db::db_pool::DbPool;
use crate::db::executor::{self, QueryResult};
use crate::db::guard::{StatementVerdict, check_statement};
use crate::db::schema::{SchemaDescription, describe_schema_pooled};
use crate::llm::extract::extract_sql;
use crate::llm::prompt::compose_prompt;
use crate::llm::{CompletionClient, LlmError};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Metadata could not be read; the turn continues with an empty schema.
    SchemaUnavailable(String),
    Prompt(String),
    CompletionFailed(LlmError),
    ExtractionEmpty,
    UnsafeStatementRejected(String),
    QueryExecution(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SchemaUnavailable(_) => "schema_unavailable",
            PipelineError::Prompt(_) => "prompt",
            PipelineError::CompletionFailed(e) if e.is_transport() => "completion_transport",
            PipelineError::CompletionFailed(_) => "completion_response",
            PipelineError::ExtractionEmpty => "extraction_empty",
            PipelineError::UnsafeStatementRejected(_) => "unsafe_statement_rejected",
            PipelineError::QueryExecution(_) => "query_execution",
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::SchemaUnavailable(msg) => {
                write!(f, "Schema unavailable, continuing without it: {}", msg)
            }
            PipelineError::Prompt(msg) => write!(f, "Could not build the prompt: {}", msg),
            PipelineError::CompletionFailed(e) => write!(f, "Could not generate a query: {}", e),
            PipelineError::ExtractionEmpty => {
                write!(f, "The model's answer did not contain a SQL statement")
            }
            PipelineError::UnsafeStatementRejected(reason) => {
                write!(f, "Query rejected before execution: {}", reason)
            }
            PipelineError::QueryExecution(msg) => write!(f, "Query failed: {}", msg),
        }
    }
}

impl Error for PipelineError {}

/// Everything produced for one question, so the caller can show what the
/// model said next to what actually ran.
#[derive(Debug)]
pub struct TurnReport {
    pub question: String,
    pub schema_warning: Option<PipelineError>,
    pub completion: Option<String>,
    pub sql: Option<String>,
    pub outcome: Result<QueryResult, PipelineError>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

impl From<&PipelineError> for ErrorBody {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub struct Pipeline<'a> {
    pool: &'a DbPool,
    completion: &'a CompletionClient,
    table: &'a str,
    query_timeout: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        pool: &'a DbPool,
        completion: &'a CompletionClient,
        table: &'a str,
        query_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            completion,
            table,
            query_timeout,
        }
    }

    pub async fn run_turn(&self, question: &str) -> TurnReport {
        let mut report = TurnReport {
            question: question.to_string(),
            schema_warning: None,
            completion: None,
            sql: None,
            outcome: Err(PipelineError::ExtractionEmpty),
        };

        let schema = match describe_schema_pooled(self.pool, self.table).await {
            Ok(schema) => schema,
            Err(e) => {
                warn!("Schema for {} unavailable: {}", self.table, e);
                report.schema_warning = Some(PipelineError::SchemaUnavailable(e.to_string()));
                SchemaDescription::empty(self.table)
            }
        };
        if schema.is_empty() {
            warn!("No columns known for {}, the model is working blind", self.table);
        }

        let prompt = match compose_prompt(&schema, question) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!("{}", e);
                report.outcome = Err(PipelineError::Prompt(e.to_string()));
                return report;
            }
        };

        let completion = match self.completion.complete(&prompt.system, &prompt.user).await {
            Ok(text) => text,
            Err(e) => {
                error!("Completion via {} failed: {}", self.completion.backend_name(), e);
                report.outcome = Err(PipelineError::CompletionFailed(e));
                return report;
            }
        };
        info!("Model answered with {} characters", completion.len());

        let extracted = extract_sql(&completion);
        report.completion = Some(completion);
        if extracted.is_empty() {
            warn!("No statement in completion");
            report.outcome = Err(PipelineError::ExtractionEmpty);
            return report;
        }
        report.sql = Some(extracted.clone());

        let sql = match check_statement(&extracted) {
            StatementVerdict::Safe(sql) => sql,
            StatementVerdict::Rejected(reason) => {
                warn!("Rejected generated statement: {}", reason);
                report.outcome = Err(PipelineError::UnsafeStatementRejected(reason));
                return report;
            }
        };

        report.outcome = executor::execute(self.pool, &sql, self.query_timeout)
            .await
            .map_err(|e| PipelineError::QueryExecution(e.to_string()));

        match &report.outcome {
            Ok(result) => info!("Turn returned {} rows", result.row_count),
            Err(e) => warn!("{}", e),
        }
        report
    }
}
