/*!
 * Error types for the sqlwai application.
 *
 * This module contains custom error types for the different layers of the
 * query pipeline, using the thiserror crate for ergonomic error definitions.
 * Every failure that reaches a client is reduced to a stable [`ErrorKind`]
 * plus a human-readable reason.
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Stable, client-facing error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TranslationTimeout,
    TranslationInvalid,
    TranslationUnavailable,
    ValidationBlocked,
    ValidationWarnNeedsOverride,
    ExecutionSyntaxError,
    ExecutionConstraintError,
    ExecutionTimeout,
    ExecutionIoError,
    ExecutionFailed,
    SessionBusy,
    SessionNotBound,
    SessionNotFound,
    DatabaseNotFound,
    InvalidRequest,
}

impl ErrorKind {
    /// Wire name of the error kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TranslationTimeout => "translation_timeout",
            Self::TranslationInvalid => "translation_invalid",
            Self::TranslationUnavailable => "translation_unavailable",
            Self::ValidationBlocked => "validation_blocked",
            Self::ValidationWarnNeedsOverride => "validation_warn_needs_override",
            Self::ExecutionSyntaxError => "execution_syntax_error",
            Self::ExecutionConstraintError => "execution_constraint_error",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ExecutionIoError => "execution_io_error",
            Self::ExecutionFailed => "execution_failed",
            Self::SessionBusy => "session_busy",
            Self::SessionNotBound => "session_not_bound",
            Self::SessionNotFound => "session_not_found",
            Self::DatabaseNotFound => "database_not_found",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The HTTP client gave up waiting for the provider
    #[error("Provider request timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Classify a reqwest failure
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::ConnectionError(error.to_string())
        } else if error.is_decode() {
            Self::ParseError(error.to_string())
        } else {
            Self::RequestFailed(error.to_string())
        }
    }

    /// Map a non-success HTTP status to the matching variant
    pub fn from_status(status_code: u16, message: String) -> Self {
        match status_code {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimitExceeded(message),
            _ => Self::ApiError { status_code, message },
        }
    }
}

/// Errors produced by the natural-language translator
#[derive(Error, Debug)]
pub enum TranslationError {
    /// The provider did not answer within the allotted time
    #[error("translation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The provider answered, but not with a usable statement
    #[error("translator returned an invalid statement: {0}")]
    Invalid(String),

    /// The provider could not be reached or rejected the request
    #[error("translation provider unavailable: {0}")]
    Unavailable(#[from] ProviderError),
}

impl TranslationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::TranslationTimeout,
            Self::Invalid(_) => ErrorKind::TranslationInvalid,
            Self::Unavailable(ProviderError::Timeout(_)) => ErrorKind::TranslationTimeout,
            Self::Unavailable(_) => ErrorKind::TranslationUnavailable,
        }
    }

    /// Whether the failure is the transient latency case worth one more attempt
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::TranslationTimeout
    }
}

/// Errors raised by the SQLite engine while running a statement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("statement interrupted after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("execution failed: {0}")]
    Failed(String),
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax(_) => ErrorKind::ExecutionSyntaxError,
            Self::Constraint(_) => ErrorKind::ExecutionConstraintError,
            Self::Io(_) => ErrorKind::ExecutionIoError,
            Self::Timeout(_) => ErrorKind::ExecutionTimeout,
            Self::Failed(_) => ErrorKind::ExecutionFailed,
        }
    }
}

/// Errors from the database registry collaborator
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Database not found: {0}")]
    NotFound(String),

    #[error("Unsupported database file: {0}")]
    Unsupported(String),

    #[error("Failed to open database {path}: {message}")]
    Open { path: String, message: String },
}

/// Errors from session lifecycle operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {0} already has a query in flight")]
    Busy(String),

    #[error("Session {0} is not bound to a database")]
    NotBound(String),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::SessionNotFound,
            Self::Busy(_) => ErrorKind::SessionBusy,
            Self::NotBound(_) => ErrorKind::SessionNotBound,
            Self::DatabaseNotFound(_) => ErrorKind::DatabaseNotFound,
        }
    }
}

/// Terminal failure of a single query submission
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error("statement blocked: {}", .reasons.join("; "))]
    ValidationBlocked { reasons: Vec<String> },

    #[error("statement requires explicit override: {}", .reasons.join("; "))]
    ValidationWarnNeedsOverride { reasons: Vec<String> },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Translation(e) => e.kind(),
            Self::ValidationBlocked { .. } => ErrorKind::ValidationBlocked,
            Self::ValidationWarnNeedsOverride { .. } => ErrorKind::ValidationWarnNeedsOverride,
            Self::Execution(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Human-readable reason, without the kind prefix
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Validator findings, when the failure is a rejection
    pub fn reasons(&self) -> &[String] {
        match self {
            Self::ValidationBlocked { reasons } | Self::ValidationWarnNeedsOverride { reasons } => {
                reasons
            }
            _ => &[],
        }
    }
}

impl From<RegistryError> for QueryError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotFound(id) => Self::Session(SessionError::DatabaseNotFound(id)),
            other => Self::Execution(ExecutionError::Io(other.to_string())),
        }
    }
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from the database registry
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Error from a query submission
    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

