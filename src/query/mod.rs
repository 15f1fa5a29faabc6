/*!
 * The query pipeline.
 *
 * - `models`: requests, results and history entries
 * - `orchestrator`: translate, validate, execute, record and broadcast
 * - `formatter`: bounded display cells and untruncated export
 * - `history`: per-session ring buffer of submissions
 * - `suggestions`: related-query prompts
 */

pub mod formatter;
pub mod history;
pub mod models;
pub mod orchestrator;
pub mod suggestions;

// Re-export main types
pub use formatter::{ExportTable, ResultFormatter};
pub use history::HistoryStore;
pub use models::{HistoryEntry, HistoryOutcome, QueryMode, QueryRequest, QueryResult};
pub use orchestrator::QueryOrchestrator;
