use axum::{
    extract::{Multipart, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::db::executor::{self, QueryResult};
use crate::db::schema::{describe_schema_pooled, SchemaDescription};
use crate::ingest::{IngestError, IngestSummary, RunRecord};
use crate::pipeline::{ErrorBody, Pipeline, PipelineError};
use crate::report::{ReportError, SummaryReport};
use crate::web::state::AppState;

const DEFAULT_RUN_LIMIT: usize = 10;
const MAX_RUN_LIMIT: usize = 100;

// Query types

#[derive(Debug, Deserialize, Clone)]
pub struct NlQueryRequest {
    pub question: String,
}

/// Everything the turn produced, so the generated SQL can be checked against
/// what actually ran.
#[derive(Debug, Serialize)]
pub struct NlQueryResponse {
    pub question: String,
    pub completion: Option<String>,
    pub sql: Option<String>,
    pub result: Option<QueryResult>,
    pub error: Option<ErrorBody>,
    pub warning: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub llm_backend: String,
    pub metrics_table: String,
    pub metrics_rows: Option<i64>,
}

// API Implementations

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::CompletionFailed(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Prompt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

// Natural language query against the metrics table
pub async fn nl_query(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<NlQueryRequest>,
) -> Result<(StatusCode, Json<NlQueryResponse>), (StatusCode, String)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question must not be empty".to_string()));
    }
    debug!("NL-query: {}", question);

    let pipeline = Pipeline::new(
        &app_state.db_pool,
        &app_state.completion,
        app_state.metrics_table(),
        Duration::from_secs(app_state.config.database.query_timeout_secs),
    );
    let report = pipeline.run_turn(question).await;

    let (status, result, error) = match report.outcome {
        Ok(result) => (StatusCode::OK, Some(result), None),
        Err(e) => (status_for(&e), None, Some(ErrorBody::from(&e))),
    };

    Ok((
        status,
        Json(NlQueryResponse {
            question: report.question,
            completion: report.completion,
            sql: report.sql,
            result,
            error,
            warning: report.schema_warning.as_ref().map(ErrorBody::from),
        }),
    ))
}

/// Pulls the `file` part out of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), (StatusCode, String)> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (StatusCode::BAD_REQUEST, format!("Invalid multipart body: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, "Upload has no file name".to_string()))?;
        let bytes = field.bytes().await.map_err(|e| {
            (StatusCode::BAD_REQUEST, format!("Failed to read upload: {}", e))
        })?;

        return Ok((file_name, bytes.to_vec()));
    }

    Err((StatusCode::BAD_REQUEST, "Missing 'file' field".to_string()))
}

fn ingest_status(err: &IngestError) -> StatusCode {
    match err {
        IngestError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

// Store a JMeter aggregate report under a new run
pub async fn upload_results(
    State(app_state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<IngestSummary>, (StatusCode, String)> {
    let (file_name, bytes) = read_upload(multipart).await?;
    info!("Received upload {} ({} bytes)", file_name, bytes.len());

    let summary = app_state
        .ingest
        .ingest_upload(&file_name, &bytes)
        .await
        .map_err(|e| {
            error!("Upload {} failed: {}", file_name, e);
            (ingest_status(&e), e.to_string())
        })?;

    Ok(Json(summary))
}

// Render the pass/fail summary of an upload as a downloadable HTML page
pub async fn summary_report(
    State(app_state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Response, (StatusCode, String)> {
    let (file_name, bytes) = read_upload(multipart).await?;

    let to_response = |e: ReportError| {
        warn!("Report for {} failed: {}", file_name, e);
        let status = match &e {
            ReportError::Upload(inner) => ingest_status(inner),
            ReportError::MissingTotal => StatusCode::BAD_REQUEST,
            ReportError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, e.to_string())
    };

    let report = SummaryReport::from_upload(&file_name, &bytes, &app_state.config.report)
        .map_err(&to_response)?;
    let html = report.render(&app_state.template_env).map_err(&to_response)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    let disposition = format!("attachment; filename=\"{}\"", report.file_name());
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, html).into_response())
}

// Most recent runs, newest first
pub async fn list_runs(
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<Vec<RunRecord>>, (StatusCode, String)> {
    let limit = params.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);

    let runs = app_state.ingest.recent_runs(limit).await.map_err(|e| {
        error!("Failed to list runs: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok(Json(runs))
}

// Live schema of the metrics table
pub async fn get_schema(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<SchemaDescription>, (StatusCode, String)> {
    let schema = describe_schema_pooled(&app_state.db_pool, app_state.metrics_table())
        .await
        .map_err(|e| {
            error!("Failed to describe schema: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Database error: {}", e))
        })?;

    Ok(Json(schema))
}

// System status
pub async fn system_status(
    State(app_state): State<Arc<AppState>>,
) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(app_state.startup_time).num_seconds();

    let count_sql = format!("SELECT COUNT(*) AS n FROM \"{}\"", app_state.metrics_table());
    let metrics_rows = match executor::execute(
        &app_state.db_pool,
        &count_sql,
        Duration::from_secs(app_state.config.database.query_timeout_secs),
    )
    .await
    {
        Ok(result) => result.rows.first().and_then(|row| row.get("n")).and_then(|n| n.as_i64()),
        Err(e) => {
            warn!("Failed to count metrics rows: {}", e);
            None
        }
    };

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        llm_backend: app_state.completion.backend_name().to_string(),
        metrics_table: app_state.metrics_table().to_string(),
        metrics_rows,
    })
}
