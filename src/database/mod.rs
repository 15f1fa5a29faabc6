/*!
 * Database access for user-supplied SQLite files.
 *
 * This module provides:
 * - `connection`: thread-safe connection wrapper with async access
 * - `schema`: schema snapshots and their versions
 * - `executor`: bounded, interruptible statement execution
 * - `registry`: loaded databases addressed by id
 */

pub mod connection;
pub mod executor;
pub mod registry;
pub mod schema;

// Re-export main types
pub use connection::DatabaseConnection;
pub use executor::{CellValue, ExecutionOutcome};
pub use registry::{DatabaseHandle, DatabaseInfo, DatabaseRegistry};
pub use schema::{ColumnSchema, SchemaSnapshot, TableSchema};
