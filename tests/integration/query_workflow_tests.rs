/*!
 * End-to-end query scenarios through the dispatcher
 */

use anyhow::Result;
use futures::future::join_all;
use sqlwai::errors::ErrorKind;
use sqlwai::query::HistoryOutcome;
use sqlwai::server::{ClientEvent, ServerEvent};
use sqlwai::{RiskLevel, StatementKind};

use crate::common::{self, mock_providers, TestClient, CHINOOK};

/// Blocked statements never reach the engine and leave one rejection entry
#[tokio::test]
async fn test_scenarioA_unrestrictedDelete_shouldBeRejectedAndRecorded() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    client.run_sql(&dispatcher, "a", "DELETE FROM customers", false).await;
    match client.outcome_of("a").await {
        ServerEvent::QueryError { kind, reasons, .. } => {
            assert_eq!(kind, ErrorKind::ValidationBlocked);
            assert_eq!(reasons, vec!["unrestricted mutating statement".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }

    client.run_sql(&dispatcher, "count", "SELECT COUNT(*) FROM customers LIMIT 1", false).await;
    match client.outcome_of("count").await {
        ServerEvent::QueryResult { result, .. } => assert_eq!(result.rows[0][0], Some("6".to_string())),
        other => panic!("unexpected {:?}", other),
    }

    dispatcher
        .handle(&client.session_id, ClientEvent::GetHistory { limit: None })
        .await;
    match client.expect("history").await {
        ServerEvent::History { entries } => {
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0].request.text, "DELETE FROM customers");
            assert!(matches!(
                entries[0].outcome,
                HistoryOutcome::Failed {
                    kind: ErrorKind::ValidationBlocked,
                    ..
                }
            ));
            assert_eq!(entries[0].verdict.as_ref().map(|v| v.risk_level), Some(RiskLevel::Block));
            assert!(entries[1].outcome.is_success());
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

/// A keyword glued to an alias by a non-ASCII space is part of the alias
#[tokio::test]
async fn test_deleteWithUnicodeSpacedWhere_shouldBeBlockedAndKeepRows() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    client
        .run_sql(&dispatcher, "nbsp", "DELETE FROM customers AS c\u{00A0}WHERE", false)
        .await;
    match client.outcome_of("nbsp").await {
        ServerEvent::QueryError { kind, reasons, .. } => {
            assert_eq!(kind, ErrorKind::ValidationBlocked);
            assert_eq!(reasons, vec!["unrestricted mutating statement".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }

    client.run_sql(&dispatcher, "count", "SELECT COUNT(*) FROM customers LIMIT 1", false).await;
    match client.outcome_of("count").await {
        ServerEvent::QueryResult { result, .. } => assert_eq!(result.rows[0][0], Some("6".to_string())),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

/// Warned statements need an explicit override
#[tokio::test]
async fn test_scenarioB_starSelectWithOverride_shouldRunWithinLimit() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    client.run_sql(&dispatcher, "plain", "SELECT * FROM tracks LIMIT 10", false).await;
    match client.outcome_of("plain").await {
        ServerEvent::QueryError { kind, reasons, .. } => {
            assert_eq!(kind, ErrorKind::ValidationWarnNeedsOverride);
            assert_eq!(reasons, vec!["unbounded column projection".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }

    client.run_sql(&dispatcher, "override", "SELECT * FROM tracks LIMIT 10", true).await;
    match client.outcome_of("override").await {
        ServerEvent::QueryResult { result, .. } => {
            assert_eq!(result.row_count, 10);
            assert!(!result.truncated);
            assert_eq!(result.columns, vec!["id", "name", "composer", "milliseconds", "unit_price"]);
            assert_eq!(result.verdict.risk_level, RiskLevel::Warn);
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_scenarioC_naturalLanguage_shouldTranslateAndExecute() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    dispatcher
        .handle(
            &client.session_id,
            ClientEvent::ExecuteNlQuery {
                request_id: Some("nl".to_string()),
                database_id: CHINOOK.to_string(),
                prompt: "show me all customers from Germany".to_string(),
                override_warnings: false,
            },
        )
        .await;

    match client.expect("query_started").await {
        ServerEvent::QueryStarted { request_id, .. } => assert_eq!(request_id, "nl"),
        other => panic!("unexpected {:?}", other),
    }
    match client.outcome_of("nl").await {
        ServerEvent::QueryResult { result, .. } => {
            assert!(result.sql.contains("WHERE country = 'Germany'"));
            assert!(!result.sql.ends_with(';'));
            assert_eq!(result.row_count, 3);
            assert!(result.rows.iter().all(|row| row[1].as_deref() == Some("Germany")));
            assert_eq!(result.explanation.as_deref(), Some("customers located in Germany"));
            assert!(result.verdict.is_safe());
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

/// Other members of the room hear about committed changes
#[tokio::test]
async fn test_scenarioD_safeUpdate_shouldNotifyOtherRoomMembers() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut writer = TestClient::connect(&dispatcher).await;
    let mut watcher = TestClient::connect(&dispatcher).await;
    writer.join(&dispatcher, CHINOOK).await;
    match watcher.join(&dispatcher, CHINOOK).await {
        ServerEvent::RoomJoined { members, .. } => assert_eq!(members, 2),
        other => panic!("unexpected {:?}", other),
    }

    writer
        .run_sql(&dispatcher, "upd", "UPDATE customers SET country = 'DE' WHERE country = 'Germany'", false)
        .await;

    match watcher.expect("database_update").await {
        ServerEvent::DatabaseUpdate {
            database_id,
            session_id,
            statement_kind,
            rows_affected,
            ..
        } => {
            assert_eq!(database_id, CHINOOK);
            assert_eq!(session_id, writer.session_id);
            assert_eq!(statement_kind, StatementKind::Update);
            assert_eq!(rows_affected, Some(3));
        }
        other => panic!("unexpected {:?}", other),
    }

    // By the time the peer hears about it, the writer's result is already queued
    let queued = writer.drain();
    assert!(
        queued.iter().any(|e| matches!(
            e,
            ServerEvent::QueryResult { request_id, result } if request_id == "upd" && result.rows_affected == Some(3)
        )),
        "{:?}",
        queued
    );
    // The writer is not notified of its own change
    assert!(queued.iter().all(|e| e.name() != "database_update"));

    watcher
        .run_sql(&dispatcher, "check", "SELECT COUNT(*) FROM customers WHERE country = 'DE' LIMIT 1", false)
        .await;
    match watcher.outcome_of("check").await {
        ServerEvent::QueryResult { result, .. } => assert_eq!(result.rows[0][0], Some("3".to_string())),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_scenarioE_secondSubmissionWhileBusy_shouldFailImmediately() -> Result<()> {
    let (_dir, controller) =
        common::loaded_controller(mock_providers::slow_chinook_provider(500), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    dispatcher
        .handle(
            &client.session_id,
            ClientEvent::ExecuteNlQuery {
                request_id: Some("slow".to_string()),
                database_id: CHINOOK.to_string(),
                prompt: "customers from Germany".to_string(),
                override_warnings: false,
            },
        )
        .await;
    client.run_sql(&dispatcher, "second", "SELECT name FROM tracks LIMIT 1", false).await;

    match client.outcome_of("second").await {
        ServerEvent::QueryError { kind, .. } => assert_eq!(kind, ErrorKind::SessionBusy),
        other => panic!("unexpected {:?}", other),
    }
    match client.outcome_of("slow").await {
        ServerEvent::QueryResult { result, .. } => assert_eq!(result.row_count, 3),
        other => panic!("unexpected {:?}", other),
    }

    // Once the first finished the session accepts work again
    client.run_sql(&dispatcher, "third", "SELECT name FROM tracks LIMIT 1", false).await;
    assert_eq!(client.outcome_of("third").await.name(), "query_result");
    Ok(())
}

#[tokio::test]
async fn test_repeatedSafeSelect_onUnchangedDatabase_shouldBeIdempotent() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    let sql = "SELECT name, composer, unit_price FROM tracks ORDER BY id LIMIT 20";
    let mut seen = Vec::new();
    for i in 0..3 {
        let request_id = format!("r{}", i);
        client.run_sql(&dispatcher, &request_id, sql, false).await;
        match client.outcome_of(&request_id).await {
            ServerEvent::QueryResult { result, .. } => seen.push((result.columns, result.rows, result.truncated)),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[1], seen[2]);
    Ok(())
}

#[tokio::test]
async fn test_query_withoutJoin_shouldReportNotBound() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;

    client.run_sql(&dispatcher, "x", "SELECT name FROM tracks LIMIT 1", false).await;
    match client.outcome_of("x").await {
        ServerEvent::QueryError { kind, .. } => assert_eq!(kind, ErrorKind::SessionNotBound),
        other => panic!("unexpected {:?}", other),
    }

    dispatcher
        .handle(
            &client.session_id,
            ClientEvent::JoinDatabase {
                database_id: "missing.db".to_string(),
            },
        )
        .await;
    match client.expect("error").await {
        ServerEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::DatabaseNotFound),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_engineErrors_shouldKeepTheirKind() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    client.run_sql(&dispatcher, "syntax", "SELECT nme FROM tracks LIMIT 1", false).await;
    match client.outcome_of("syntax").await {
        ServerEvent::QueryError { kind, reason, .. } => {
            assert_eq!(kind, ErrorKind::ExecutionSyntaxError);
            assert!(reason.contains("nme"), "{}", reason);
        }
        other => panic!("unexpected {:?}", other),
    }

    client
        .run_sql(&dispatcher, "constraint", "INSERT INTO customers (id, name) VALUES (1, 'dup')", false)
        .await;
    match client.outcome_of("constraint").await {
        ServerEvent::QueryError { kind, .. } => assert_eq!(kind, ErrorKind::ExecutionConstraintError),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_suggestionsAndStatus_shouldDescribeBoundDatabase() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    client.run_sql(&dispatcher, "q", "SELECT name FROM customers WHERE id = 1 LIMIT 1", false).await;
    client.outcome_of("q").await;

    dispatcher
        .handle(&client.session_id, ClientEvent::GetSuggestions { database_id: None })
        .await;
    match client.expect("suggestions").await {
        ServerEvent::Suggestions { database_id, suggestions } => {
            assert_eq!(database_id, CHINOOK);
            assert!(!suggestions.is_empty() && suggestions.len() <= 5);
            assert_eq!(suggestions[0], "How many records are in customers?");
            // The last query already filtered
            assert!(!suggestions.iter().any(|s| s.contains("specific conditions")));
        }
        other => panic!("unexpected {:?}", other),
    }

    dispatcher
        .handle(&client.session_id, ClientEvent::GetDatabaseStatus { database_id: None })
        .await;
    match client.expect("database_status").await {
        ServerEvent::DatabaseStatus {
            members, schema, size_bytes, ..
        } => {
            assert_eq!(members, 1);
            assert!(size_bytes > 0);
            assert!(schema.table("customers").is_some());
            assert!(schema.table("tracks").is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

/// Sessions are independent: each runs its own query concurrently
#[tokio::test]
async fn test_manySessions_shouldEachReceiveTheirOwnResult() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();

    let runs = (1..=8).map(|id| {
        let dispatcher = dispatcher.clone();
        async move {
            let mut client = TestClient::connect(&dispatcher).await;
            client.join(&dispatcher, CHINOOK).await;
            let sql = format!("SELECT name FROM tracks WHERE id = {} LIMIT 1", id);
            client.run_sql(&dispatcher, "mine", &sql, false).await;
            match client.outcome_of("mine").await {
                ServerEvent::QueryResult { result, .. } => result.rows[0][0].clone(),
                other => panic!("unexpected {:?}", other),
            }
        }
    });

    let names = join_all(runs).await;
    for (i, name) in names.into_iter().enumerate() {
        assert_eq!(name, Some(format!("Track {}", i + 1)));
    }
    assert_eq!(controller.sessions().room_members(CHINOOK), 8);
    Ok(())
}
