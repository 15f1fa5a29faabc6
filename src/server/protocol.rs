/*!
 * Named-event wire protocol.
 *
 * Every frame is one JSON object on its own line:
 *
 * ```text
 * {"event": "execute_sql_query", "payload": {"database_id": "chinook.db", "sql": "SELECT 1"}}
 * ```
 *
 * Events without data (`ping`, `close`, ...) may omit `payload`.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::SchemaSnapshot;
use crate::errors::{ErrorKind, QueryError};
use crate::query::{HistoryEntry, QueryMode, QueryResult};
use crate::session::ConnectionStats;
use crate::validation::StatementKind;

/// Frames sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Re-attach to a previously issued session. Only valid as the first frame.
    Resume { session_id: String },
    ExecuteSqlQuery {
        #[serde(default)]
        request_id: Option<String>,
        database_id: String,
        sql: String,
        #[serde(default)]
        override_warnings: bool,
    },
    ExecuteNlQuery {
        #[serde(default)]
        request_id: Option<String>,
        database_id: String,
        prompt: String,
        #[serde(default)]
        override_warnings: bool,
    },
    JoinDatabase { database_id: String },
    LeaveDatabase,
    GetHistory {
        #[serde(default)]
        limit: Option<usize>,
    },
    GetSuggestions {
        #[serde(default)]
        database_id: Option<String>,
    },
    GetDatabaseStatus {
        #[serde(default)]
        database_id: Option<String>,
    },
    GetActiveConnections,
    Ping,
    Pong,
    Close,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Resume { .. } => "resume",
            Self::ExecuteSqlQuery { .. } => "execute_sql_query",
            Self::ExecuteNlQuery { .. } => "execute_nl_query",
            Self::JoinDatabase { .. } => "join_database",
            Self::LeaveDatabase => "leave_database",
            Self::GetHistory { .. } => "get_history",
            Self::GetSuggestions { .. } => "get_suggestions",
            Self::GetDatabaseStatus { .. } => "get_database_status",
            Self::GetActiveConnections => "get_active_connections",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Close => "close",
        }
    }
}

/// Frames sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First frame on every transport
    Connection {
        session_id: String,
        resumed: bool,
        /// Set when a resume asked for an id that had already expired
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bound_database: Option<String>,
    },
    RoomJoined {
        database_id: String,
        members: usize,
        schema_version: String,
    },
    RoomLeft {
        database_id: String,
    },
    QueryStarted {
        request_id: String,
        mode: QueryMode,
    },
    QueryResult {
        request_id: String,
        result: QueryResult,
    },
    QueryError {
        request_id: String,
        kind: ErrorKind,
        reason: String,
        /// Validator findings for rejected statements
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reasons: Vec<String>,
    },
    /// Another member of the room changed the database
    DatabaseUpdate {
        database_id: String,
        session_id: String,
        statement_kind: StatementKind,
        sql: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rows_affected: Option<usize>,
        schema_version: String,
        timestamp: DateTime<Utc>,
    },
    History {
        entries: Vec<HistoryEntry>,
    },
    Suggestions {
        database_id: String,
        suggestions: Vec<String>,
    },
    DatabaseStatus {
        database_id: String,
        size_bytes: u64,
        members: usize,
        schema: SchemaSnapshot,
    },
    ActiveConnections {
        stats: ConnectionStats,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        kind: ErrorKind,
        reason: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::RoomJoined { .. } => "room_joined",
            Self::RoomLeft { .. } => "room_left",
            Self::QueryStarted { .. } => "query_started",
            Self::QueryResult { .. } => "query_result",
            Self::QueryError { .. } => "query_error",
            Self::DatabaseUpdate { .. } => "database_update",
            Self::History { .. } => "history",
            Self::Suggestions { .. } => "suggestions",
            Self::DatabaseStatus { .. } => "database_status",
            Self::ActiveConnections { .. } => "active_connections",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }

    pub fn ping() -> Self {
        Self::Ping { timestamp: Utc::now() }
    }

    pub fn error(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self::Error {
            kind,
            reason: reason.into(),
        }
    }

    pub fn query_error(request_id: impl Into<String>, error: &QueryError) -> Self {
        Self::QueryError {
            request_id: request_id.into(),
            kind: error.kind(),
            reason: error.reason(),
            reasons: error.reasons().to_vec(),
        }
    }
}

/// Parse one inbound line
pub fn decode(line: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(line)
}

/// Serialize one outbound frame, without the trailing newline
pub fn encode(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
