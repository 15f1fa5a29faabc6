/*!
 * Session lifecycle: resume, supersede, heartbeat and expiry
 */

use anyhow::Result;
use std::time::{Duration, Instant};
use sqlwai::errors::ErrorKind;
use sqlwai::server::{ClientEvent, Flow, ServerEvent};

use crate::common::{self, mock_providers, TestClient, CHINOOK};

#[tokio::test]
async fn test_resume_withinGraceWindow_shouldKeepBindingAndHistory() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;
    client.run_sql(&dispatcher, "q", "SELECT name FROM tracks LIMIT 2", false).await;
    client.outcome_of("q").await;

    dispatcher.transport_closed(&client.session_id, &client.transport_id);
    assert!(!controller.sessions().is_attached(&client.session_id));
    assert!(controller.sessions().exists(&client.session_id));

    let (mut resumed, ack) = TestClient::open(
        &dispatcher,
        Some(ClientEvent::Resume {
            session_id: client.session_id.clone(),
        }),
    )
    .await;
    assert_eq!(resumed.session_id, client.session_id);
    assert_eq!(
        ack,
        ServerEvent::Connection {
            session_id: client.session_id.clone(),
            resumed: true,
            previous_session_id: None,
            bound_database: Some(CHINOOK.to_string()),
        }
    );

    dispatcher
        .handle(&resumed.session_id, ClientEvent::GetHistory { limit: Some(10) })
        .await;
    match resumed.expect("history").await {
        ServerEvent::History { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].request.request_id, "q");
        }
        other => panic!("unexpected {:?}", other),
    }

    // Still bound: queries run without joining again
    resumed.run_sql(&dispatcher, "again", "SELECT name FROM tracks LIMIT 1", false).await;
    assert_eq!(resumed.outcome_of("again").await.name(), "query_result");
    Ok(())
}

#[tokio::test]
async fn test_resume_shouldFlushResultsProducedWhileDetached() -> Result<()> {
    let (_dir, controller) =
        common::loaded_controller(mock_providers::slow_chinook_provider(300), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    dispatcher
        .handle(
            &client.session_id,
            ClientEvent::ExecuteNlQuery {
                request_id: Some("late".to_string()),
                database_id: CHINOOK.to_string(),
                prompt: "customers in Germany".to_string(),
                override_warnings: false,
            },
        )
        .await;
    client.expect("query_started").await;
    dispatcher.transport_closed(&client.session_id, &client.transport_id);

    // The query keeps running and its result is parked
    let deadline = Instant::now() + Duration::from_secs(5);
    while controller.sessions().queued(&client.session_id) == 0 {
        assert!(Instant::now() < deadline, "result was never queued");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (mut resumed, ack) = TestClient::open(
        &dispatcher,
        Some(ClientEvent::Resume {
            session_id: client.session_id.clone(),
        }),
    )
    .await;
    assert!(matches!(ack, ServerEvent::Connection { resumed: true, .. }));
    match resumed.next_event().await {
        ServerEvent::QueryResult { request_id, result } => {
            assert_eq!(request_id, "late");
            assert_eq!(result.row_count, 3);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(controller.sessions().queued(&client.session_id), 0);
    Ok(())
}

#[tokio::test]
async fn test_resume_withUnknownId_shouldIssueNewSession() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();

    let (client, ack) = TestClient::open(
        &dispatcher,
        Some(ClientEvent::Resume {
            session_id: "never-issued".to_string(),
        }),
    )
    .await;
    match ack {
        ServerEvent::Connection {
            session_id,
            resumed,
            previous_session_id,
            bound_database,
        } => {
            assert_eq!(session_id, client.session_id);
            assert_ne!(session_id, "never-issued");
            assert!(!resumed);
            assert_eq!(previous_session_id.as_deref(), Some("never-issued"));
            assert_eq!(bound_database, None);
        }
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_resume_whileAttached_shouldSupersedeOldTransport() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut first = TestClient::connect(&dispatcher).await;

    let (second, _) = TestClient::open(
        &dispatcher,
        Some(ClientEvent::Resume {
            session_id: first.session_id.clone(),
        }),
    )
    .await;
    assert_eq!(first.expect_close().await, "superseded by resume");

    // A late close notice from the superseded transport is ignored
    dispatcher.transport_closed(&first.session_id, &first.transport_id);
    assert!(controller.sessions().is_attached(&second.session_id));
    Ok(())
}

#[tokio::test]
async fn test_sweep_shouldDetachSilentSessionsThenExpireThem() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;
    client.run_sql(&dispatcher, "q", "SELECT name FROM tracks LIMIT 1", false).await;
    client.outcome_of("q").await;

    let sessions = controller.sessions();
    let report = sessions.sweep_at(Instant::now() + Duration::from_secs(3));
    assert_eq!(report.stale, vec![client.session_id.clone()]);
    assert!(report.expired.is_empty());
    assert!(!sessions.is_attached(&client.session_id));
    assert!(sessions.exists(&client.session_id));

    let report = sessions.sweep_at(Instant::now() + Duration::from_secs(61));
    assert_eq!(report.expired, vec![client.session_id.clone()]);
    assert!(!sessions.exists(&client.session_id));
    assert_eq!(sessions.room_members(CHINOOK), 0);

    // An expired id resumes into a fresh session without history
    let (fresh, _) = TestClient::open(
        &dispatcher,
        Some(ClientEvent::Resume {
            session_id: client.session_id.clone(),
        }),
    )
    .await;
    assert_ne!(fresh.session_id, client.session_id);
    Ok(())
}

#[tokio::test]
async fn test_heartbeat_shouldPingThenDropSilentTransport() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    controller.sessions().spawn_heartbeat();

    client.expect("ping").await;
    assert_eq!(client.expect_close().await, "heartbeat timeout");
    assert!(controller.sessions().exists(&client.session_id));

    controller.sessions().shutdown();
    Ok(())
}

#[tokio::test]
async fn test_close_shouldEndSessionAndRejectLaterEvents() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let dispatcher = controller.dispatcher();
    let mut client = TestClient::connect(&dispatcher).await;
    client.join(&dispatcher, CHINOOK).await;

    dispatcher.handle(&client.session_id, ClientEvent::LeaveDatabase).await;
    assert_eq!(client.expect("room_left").await.name(), "room_left");
    dispatcher.handle(&client.session_id, ClientEvent::LeaveDatabase).await;
    match client.expect("error").await {
        ServerEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::SessionNotBound),
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(dispatcher.handle(&client.session_id, ClientEvent::Close).await, Flow::Close);
    assert!(!controller.sessions().exists(&client.session_id));
    assert_eq!(dispatcher.handle(&client.session_id, ClientEvent::Ping).await, Flow::Close);
    Ok(())
}
