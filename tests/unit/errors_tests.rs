/*!
 * Tests for error classification and conversions
 */

use std::time::Duration;
use sqlwai::errors::{
    AppError, ErrorKind, ExecutionError, ProviderError, QueryError, RegistryError, SessionError, TranslationError,
};

#[test]
fn test_errorKind_shouldSerializeAsSnakeCase() {
    for kind in [
        ErrorKind::TranslationTimeout,
        ErrorKind::ValidationWarnNeedsOverride,
        ErrorKind::ExecutionConstraintError,
        ErrorKind::SessionNotBound,
        ErrorKind::DatabaseNotFound,
    ] {
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
        assert_eq!(serde_json::from_str::<ErrorKind>(&json).unwrap(), kind);
    }
}

#[test]
fn test_providerFailures_shouldMapToTranslationKinds() {
    let timeout: TranslationError = ProviderError::Timeout("read".to_string()).into();
    assert_eq!(timeout.kind(), ErrorKind::TranslationTimeout);
    assert!(timeout.is_timeout());

    let auth: TranslationError = ProviderError::from_status(401, "bad key".to_string()).into();
    assert_eq!(auth.kind(), ErrorKind::TranslationUnavailable);
    assert!(!auth.is_timeout());

    let invalid = TranslationError::Invalid("no sql".to_string());
    assert_eq!(QueryError::from(invalid).kind(), ErrorKind::TranslationInvalid);
}

#[test]
fn test_queryError_shouldKeepEngineMessageAndKind() {
    let error = QueryError::from(ExecutionError::Syntax("near \"SELEC\": syntax error".to_string()));
    assert_eq!(error.kind(), ErrorKind::ExecutionSyntaxError);
    assert!(error.reason().contains("SELEC"));
    assert!(error.reasons().is_empty());

    let timeout = QueryError::from(ExecutionError::Timeout(Duration::from_millis(1500)));
    assert_eq!(timeout.kind(), ErrorKind::ExecutionTimeout);
    assert_eq!(timeout.reason(), "statement interrupted after 1500ms");
}

#[test]
fn test_registryNotFound_shouldBecomeDatabaseNotFound() {
    let error = QueryError::from(RegistryError::NotFound("chinook.db".to_string()));
    assert_eq!(error.kind(), ErrorKind::DatabaseNotFound);
    assert!(matches!(error, QueryError::Session(SessionError::DatabaseNotFound(_))));
}

#[test]
fn test_appError_shouldWrapLayerErrors() {
    let app: AppError = RegistryError::Unsupported("notes.txt".to_string()).into();
    assert_eq!(app.to_string(), "Registry error: Unsupported database file: notes.txt");

    let app: AppError = QueryError::ValidationBlocked {
        reasons: vec!["empty statement".to_string()],
    }
    .into();
    assert_eq!(app.to_string(), "Query error: statement blocked: empty statement");
}
