//! Persisted run records.

use chrono::{DateTime, Utc};
use pipeline_core::Status;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which stream a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Stdout,
    Stderr,
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of one pipeline run: lifecycle timestamps, the submitted
/// config, and the tail of its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub yaml: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

impl PipelineRecord {
    pub fn new(id: &str, name: &str, yaml: &str, config: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: Status::Pending,
            started_at: Utc::now(),
            succeed_at: None,
            failed_at: None,
            cancelled_at: None,
            error: None,
            config,
            yaml: yaml.into(),
            logs: Vec::new(),
        }
    }
}
