/*!
 * Statement execution against a bound database.
 *
 * Execution runs on the blocking pool. Result sets are capped at the caller's
 * row limit: one extra row is fetched to learn whether the set was truncated,
 * and is then discarded. A wall-clock timeout interrupts the statement inside
 * SQLite rather than abandoning the blocking task.
 */

use log::{debug, warn};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connection::DatabaseConnection;
use crate::errors::ExecutionError;

/// A single value as returned by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<ValueRef<'_>> for CellValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

/// Raw outcome of one statement
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Column names in engine order
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// Number of rows returned, never above the row limit
    pub row_count: usize,
    pub truncated: bool,
    /// Set for statements that produce no result columns
    pub rows_affected: Option<usize>,
    pub execution_time_ms: u64,
}

// Lifecycle of a blocking execution, shared with the timeout watcher
const STATE_WAITING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_CANCELLED: u8 = 2;
const STATE_DONE: u8 = 3;

/// Execute `sql` and collect at most `row_limit` rows.
///
/// If the statement is still waiting for the connection when the timeout
/// fires it never starts; if it is running it is interrupted. Either way the
/// caller sees [`ExecutionError::Timeout`].
pub async fn execute(
    connection: &DatabaseConnection,
    sql: &str,
    row_limit: usize,
    timeout: Duration,
) -> Result<ExecutionOutcome, ExecutionError> {
    let sql = strip_terminators(sql).to_string();
    let shared = connection.shared();
    let state = Arc::new(AtomicU8::new(STATE_WAITING));
    let task_state = state.clone();
    let started = Instant::now();

    let mut task = tokio::task::spawn_blocking(move || {
        let conn = shared.lock();
        if task_state
            .compare_exchange(STATE_WAITING, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExecutionError::Timeout(timeout));
        }
        let result = run_statement(&conn, &sql, row_limit, timeout);
        task_state.store(STATE_DONE, Ordering::SeqCst);
        result
    });

    let joined = match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            if state
                .compare_exchange(STATE_WAITING, STATE_CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
                && state.load(Ordering::SeqCst) == STATE_RUNNING
            {
                warn!("Statement exceeded {}ms, interrupting", timeout.as_millis());
                connection.interrupt();
            }
            // The task is not abandoned; SQLite unwinds with an interrupted
            // error unless the statement finished in the meantime
            task.await
        }
    };

    let mut outcome =
        joined.map_err(|e| ExecutionError::Failed(format!("execution task failed: {}", e)))??;
    outcome.execution_time_ms = started.elapsed().as_millis() as u64;

    debug!(
        "Executed statement: {} rows, truncated={}, {}ms",
        outcome.row_count, outcome.truncated, outcome.execution_time_ms
    );

    Ok(outcome)
}

/// Drop trailing terminators so the engine sees exactly one statement
fn strip_terminators(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    row_limit: usize,
    timeout: Duration,
) -> Result<ExecutionOutcome, ExecutionError> {
    let map = |e: rusqlite::Error| map_sqlite_error(e, timeout);

    let mut stmt = conn.prepare(sql).map_err(map)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    if columns.is_empty() {
        let affected = stmt.execute([]).map_err(map)?;
        return Ok(ExecutionOutcome {
            columns,
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
            rows_affected: Some(affected),
            execution_time_ms: 0,
        });
    }

    let width = columns.len();
    let mut rows = Vec::new();
    let mut truncated = false;
    let mut cursor = stmt.query([]).map_err(map)?;
    while let Some(row) = cursor.next().map_err(map)? {
        if rows.len() == row_limit {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(CellValue::from(row.get_ref(i).map_err(map)?));
        }
        rows.push(values);
    }

    Ok(ExecutionOutcome {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
        rows_affected: None,
        execution_time_ms: 0,
    })
}

/// Map engine failures onto the execution taxonomy
pub fn map_sqlite_error(error: rusqlite::Error, timeout: Duration) -> ExecutionError {
    match error {
        rusqlite::Error::SqliteFailure(err, message) => {
            let message = message.unwrap_or_else(|| err.to_string());
            match err.code {
                ErrorCode::ConstraintViolation => ExecutionError::Constraint(message),
                ErrorCode::OperationInterrupted
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked => ExecutionError::Timeout(timeout),
                ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied => ExecutionError::Io(message),
                // Plain SQLITE_ERROR: syntax errors, unknown tables and columns
                ErrorCode::Unknown => ExecutionError::Syntax(message),
                _ => ExecutionError::Failed(message),
            }
        }
        rusqlite::Error::MultipleStatement => {
            ExecutionError::Syntax("multiple statements are not allowed".to_string())
        }
        rusqlite::Error::InvalidQuery => ExecutionError::Syntax("invalid query".to_string()),
        other => ExecutionError::Failed(other.to_string()),
    }
}
