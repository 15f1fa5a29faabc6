/*!
 * Request, result and history types of the query pipeline.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ErrorKind, QueryError};
use crate::validation::SafetyVerdict;

use super::formatter::ExportTable;

/// How the submitted text should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    RawSql,
    NaturalLanguage,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawSql => "raw_sql",
            Self::NaturalLanguage => "natural_language",
        }
    }
}

/// A single submission. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub request_id: String,
    pub session_id: String,
    pub database_id: String,
    pub mode: QueryMode,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
    /// Attach the untruncated table to the result
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub export: bool,
}

impl QueryRequest {
    pub fn new(
        session_id: impl Into<String>,
        database_id: impl Into<String>,
        mode: QueryMode,
        text: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            database_id: database_id.into(),
            mode,
            text: text.into(),
            submitted_at: Utc::now(),
            export: false,
        }
    }

    /// Keep a client-chosen request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_export(mut self) -> Self {
        self.export = true;
        self
    }
}

/// Formatted outcome of a successful submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// The statement that actually ran
    pub sql: String,
    pub columns: Vec<String>,
    /// Display cells; `None` is SQL NULL
    pub rows: Vec<Vec<Option<String>>>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<usize>,
    pub truncated: bool,
    pub execution_time_ms: u64,
    /// Translator explanation, natural-language mode only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub verdict: SafetyVerdict,
    /// Untruncated cells, only when the request asked for them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportTable>,
}

/// What happened to a recorded request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HistoryOutcome {
    Completed {
        sql: String,
        row_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        rows_affected: Option<usize>,
        truncated: bool,
        execution_time_ms: u64,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        kind: ErrorKind,
        reason: String,
    },
}

impl HistoryOutcome {
    pub fn completed(result: &QueryResult) -> Self {
        Self::Completed {
            sql: result.sql.clone(),
            row_count: result.row_count,
            rows_affected: result.rows_affected,
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
        }
    }

    pub fn failed(sql: Option<String>, error: &QueryError) -> Self {
        Self::Failed {
            sql,
            kind: error.kind(),
            reason: error.reason(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The statement involved, when one was produced
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Completed { sql, .. } => Some(sql),
            Self::Failed { sql, .. } => sql.as_deref(),
        }
    }
}

/// One line of a session's query log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub database_id: String,
    pub request: QueryRequest,
    /// Absent when the request failed before validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<SafetyVerdict>,
    pub outcome: HistoryOutcome,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(request: &QueryRequest, verdict: Option<SafetyVerdict>, outcome: HistoryOutcome) -> Self {
        Self {
            session_id: request.session_id.clone(),
            database_id: request.database_id.clone(),
            request: request.clone(),
            verdict,
            outcome,
            timestamp: Utc::now(),
        }
    }
}
