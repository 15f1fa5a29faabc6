/*!
 * Shaping of raw engine rows into display and export form.
 *
 * Display cells are capped at a character budget and end with `…` when cut.
 * SQL NULL stays `None` all the way to the wire, so it serializes as JSON
 * `null` and never collides with an empty string.
 */

use serde::{Deserialize, Serialize};

use crate::database::{CellValue, ExecutionOutcome};
use crate::validation::SafetyVerdict;

use super::models::QueryResult;

/// Marker appended to truncated cells
pub const TRUNCATION_MARKER: char = '…';

/// Untruncated tabular form for CSV-style consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Renders execution outcomes for clients
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    max_cell_chars: usize,
}

impl ResultFormatter {
    pub fn new(max_cell_chars: usize) -> Self {
        Self { max_cell_chars }
    }

    /// Full textual rendering of one cell
    pub fn render_cell(value: &CellValue) -> Option<String> {
        match value {
            CellValue::Null => None,
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Real(f) => Some(f.to_string()),
            CellValue::Text(t) => Some(t.clone()),
            CellValue::Blob(b) => Some(format!("<blob {} bytes>", b.len())),
        }
    }

    /// Cap a string at the character budget, counting chars not bytes
    pub fn truncate_text(&self, text: String) -> String {
        if text.chars().count() <= self.max_cell_chars {
            return text;
        }
        let mut cut: String = text.chars().take(self.max_cell_chars).collect();
        cut.push(TRUNCATION_MARKER);
        cut
    }

    pub fn format_cell(&self, value: &CellValue) -> Option<String> {
        Self::render_cell(value).map(|text| self.truncate_text(text))
    }

    /// Build the client-facing result. Column order is the engine's.
    pub fn format(
        &self,
        sql: &str,
        outcome: &ExecutionOutcome,
        explanation: Option<String>,
        verdict: SafetyVerdict,
    ) -> QueryResult {
        let rows = outcome
            .rows
            .iter()
            .map(|row| row.iter().map(|cell| self.format_cell(cell)).collect())
            .collect();

        QueryResult {
            sql: sql.to_string(),
            columns: outcome.columns.clone(),
            rows,
            row_count: outcome.row_count,
            rows_affected: outcome.rows_affected,
            truncated: outcome.truncated,
            execution_time_ms: outcome.execution_time_ms,
            explanation,
            verdict,
            export: None,
        }
    }

    pub fn export(outcome: &ExecutionOutcome) -> ExportTable {
        ExportTable {
            columns: outcome.columns.clone(),
            rows: outcome
                .rows
                .iter()
                .map(|row| row.iter().map(Self::render_cell).collect())
                .collect(),
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(200)
    }
}
