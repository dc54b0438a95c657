use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::sync::LazyLock;

use crate::ingest::IngestError;

const UPLOAD_TIME_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

static UPLOAD_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]+[\d.]*_\d{2}-\d{2}-\d{4}-\d{2}-\d{2}-\d{2}_\d{2}-\d{2}-\d{4}-\d{2}-\d{2}-\d{2}$")
        .expect("valid upload name pattern")
});

/// Test identity carried in an upload's file name:
/// `<TestName>_<dd-mm-YYYY-HH-MM-SS>_<dd-mm-YYYY-HH-MM-SS>.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadName {
    pub test_name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl UploadName {
    pub fn parse(file_name: &str) -> Result<Self, IngestError> {
        let invalid = |reason: &str| {
            IngestError::InvalidFileName(format!(
                "{}: {} (expected <TestName>_<dd-mm-YYYY-HH-MM-SS>_<dd-mm-YYYY-HH-MM-SS>.csv)",
                file_name, reason
            ))
        };

        // Browsers may send a full client-side path
        let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
        let stem = match base.rsplit_once('.') {
            Some((stem, ext)) if ext.eq_ignore_ascii_case("csv") => stem,
            _ => return Err(invalid("not a .csv file")),
        };

        if !UPLOAD_NAME.is_match(stem) {
            return Err(invalid("name does not match the pattern"));
        }

        let mut parts = stem.split('_');
        let (Some(test_name), Some(start), Some(end)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("name does not match the pattern"));
        };

        let start = NaiveDateTime::parse_from_str(start, UPLOAD_TIME_FORMAT)
            .map_err(|e| invalid(&format!("bad start time ({})", e)))?;
        let end = NaiveDateTime::parse_from_str(end, UPLOAD_TIME_FORMAT)
            .map_err(|e| invalid(&format!("bad end time ({})", e)))?;
        if end < start {
            return Err(invalid("end time is before start time"));
        }

        Ok(Self {
            test_name: test_name.to_string(),
            start,
            end,
        })
    }

    /// Wall-clock length of the run as `mm:ss`; minutes are not wrapped into hours.
    pub fn duration_mm_ss(&self) -> String {
        let secs = (self.end - self.start).num_seconds().max(0);
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

/// One line of a JMeter aggregate report.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregateRow {
    #[serde(rename = "Label")]
    pub label: String,
    #[serde(rename = "# Samples")]
    pub samples: i64,
    #[serde(rename = "Average")]
    pub average: f64,
    #[serde(rename = "Median")]
    pub median: f64,
    #[serde(rename = "90% Line")]
    pub p90: f64,
    #[serde(rename = "95% Line")]
    pub p95: f64,
    #[serde(rename = "99% Line")]
    pub p99: f64,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Max")]
    pub max: f64,
    #[serde(rename = "Error %", deserialize_with = "percentage")]
    pub error_percentage: f64,
    #[serde(rename = "Throughput")]
    pub throughput: f64,
    #[serde(rename = "Received KB/sec")]
    pub received_kb_per_sec: f64,
    #[serde(rename = "Std. Dev.")]
    pub std_dev: f64,
}

impl AggregateRow {
    pub fn is_total(&self) -> bool {
        self.label == "TOTAL"
    }
}

/// Accepts `"1.25%"` as well as a bare `1.25`.
fn percentage<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .map_err(|e| serde::de::Error::custom(format!("invalid percentage {:?}: {}", raw, e)))
}

/// Parses an aggregate report upload. A UTF-8 byte order mark is tolerated and
/// blank lines are skipped.
pub fn parse_aggregate_report(bytes: &[u8]) -> Result<Vec<AggregateRow>, IngestError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| IngestError::ParsingError(format!("upload is not UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    if text.trim().is_empty() {
        return Err(IngestError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (index, record) in reader.deserialize::<AggregateRow>().enumerate() {
        // Header is line 1
        let row = record.map_err(|e| {
            IngestError::ParsingError(format!("line {}: {}", index + 2, e))
        })?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(IngestError::EmptyFile);
    }
    Ok(rows)
}
