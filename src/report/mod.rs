//! Pass/fail summary of one uploaded aggregate report, rendered as HTML.

use minijinja::{Environment, context};
use serde::Serialize;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use tracing::info;

use crate::config::ReportConfig;
use crate::ingest::IngestError;
use crate::ingest::csv::{AggregateRow, UploadName, parse_aggregate_report};

pub const REPORT_TEMPLATE: &str = "report.html";

#[derive(Debug)]
pub enum ReportError {
    Upload(IngestError),
    MissingTotal,
    Render(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Upload(e) => write!(f, "{}", e),
            ReportError::MissingTotal => write!(f, "The report has no TOTAL row"),
            ReportError::Render(msg) => write!(f, "Failed to render report: {}", msg),
        }
    }
}

impl Error for ReportError {}

impl From<IngestError> for ReportError {
    fn from(err: IngestError) -> Self {
        ReportError::Upload(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TestStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaMiss {
    pub label: String,
    pub p90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub test_name: String,
    pub status: TestStatus,
    pub throughput: f64,
    pub start_time: String,
    pub end_time: String,
    pub duration: String,
    pub total_samples: i64,
    pub passed_samples: i64,
    pub failed_samples: i64,
    pub error_percentage: f64,
    pub acceptable_error_rate: f64,
    pub sla_secs: u64,
    /// Distinct labels whose 90th percentile is within the SLA.
    pub meeting_sla: usize,
    pub not_meeting_sla: usize,
    pub sla_misses: Vec<SlaMiss>,
}

impl SummaryReport {
    pub fn from_upload(file_name: &str, bytes: &[u8], config: &ReportConfig) -> Result<Self, ReportError> {
        let name = UploadName::parse(file_name)?;
        let rows = parse_aggregate_report(bytes)?;
        Self::summarize(&name, &rows, config)
    }

    pub fn summarize(name: &UploadName, rows: &[AggregateRow], config: &ReportConfig) -> Result<Self, ReportError> {
        let total = rows.iter().find(|row| row.is_total()).ok_or(ReportError::MissingTotal)?;

        let status = if total.error_percentage > config.acceptable_error_rate {
            TestStatus::Fail
        } else {
            TestStatus::Pass
        };

        let failed_samples = (total.samples as f64 * total.error_percentage / 100.0).round() as i64;
        let sla_ms = (config.sla_secs * 1000) as f64;

        let mut meeting = HashSet::new();
        let mut missing = HashSet::new();
        let mut sla_misses = Vec::new();
        for row in rows.iter().filter(|row| !row.is_total()) {
            if row.p90 <= sla_ms {
                meeting.insert(row.label.as_str());
            } else {
                missing.insert(row.label.as_str());
                sla_misses.push(SlaMiss {
                    label: row.label.clone(),
                    p90: row.p90,
                });
            }
        }

        Ok(Self {
            test_name: name.test_name.clone(),
            status,
            throughput: total.throughput,
            start_time: name.start.format("%Y-%m-%d %H:%M:%S").to_string(),
            end_time: name.end.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration: name.duration_mm_ss(),
            total_samples: total.samples,
            passed_samples: total.samples - failed_samples,
            failed_samples,
            error_percentage: total.error_percentage,
            acceptable_error_rate: config.acceptable_error_rate,
            sla_secs: config.sla_secs,
            meeting_sla: meeting.len(),
            not_meeting_sla: missing.len(),
            sla_misses,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}_PerfTestReport.html", self.test_name)
    }

    pub fn render(&self, env: &Environment<'_>) -> Result<String, ReportError> {
        let template = env
            .get_template(REPORT_TEMPLATE)
            .map_err(|e| ReportError::Render(e.to_string()))?;
        let html = template
            .render(context! { report => self })
            .map_err(|e| ReportError::Render(e.to_string()))?;

        info!("Rendered {} ({:?})", self.file_name(), self.status);
        Ok(html)
    }
}
