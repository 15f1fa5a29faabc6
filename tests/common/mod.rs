/*!
 * Common test utilities for the sqlwai test suite
 */

use anyhow::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use sqlwai::app_config::Config;
use sqlwai::providers::mock::MockProvider;
use sqlwai::server::{ClientEvent, Dispatcher, ServerEvent};
use sqlwai::session::{ChannelTransport, Outbound, Transport};
use sqlwai::translation::LlmTranslator;
use sqlwai::Controller;

// Re-export the mock providers module
pub mod mock_providers;

/// Database id of the fixture created by [`create_chinook_db`]
pub const CHINOOK: &str = "chinook.db";

/// Route library logs to the test harness; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Creates a temporary directory for test files
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a small music-store database with customers and tracks
pub fn create_chinook_db(dir: &Path, filename: &str) -> Result<PathBuf> {
    let path = dir.join(filename);
    let conn = Connection::open(&path)?;
    conn.execute_batch(
        "CREATE TABLE customers (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             country TEXT,
             email TEXT
         );
         CREATE TABLE tracks (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             composer TEXT,
             milliseconds INTEGER,
             unit_price REAL
         );
         INSERT INTO customers (name, country, email) VALUES
             ('Leonie Köhler', 'Germany', 'leonekohler@surfeu.de'),
             ('Niklas Schröder', 'Germany', NULL),
             ('Hannah Schneider', 'Germany', 'hannah.schneider@yahoo.de'),
             ('François Tremblay', 'Canada', 'ftremblay@gmail.com'),
             ('Bjørn Hansen', 'Norway', ''),
             ('Luís Gonçalves', 'Brazil', 'luisg@embraer.com.br');",
    )?;

    let mut insert = conn.prepare("INSERT INTO tracks (name, composer, milliseconds, unit_price) VALUES (?1, ?2, ?3, ?4)")?;
    for i in 1..=25 {
        let composer = if i % 5 == 0 { None } else { Some(format!("Composer {}", i % 3)) };
        insert.execute(rusqlite::params![format!("Track {}", i), composer, 180_000 + i * 1_000, 0.99])?;
    }

    Ok(path)
}

/// Default configuration with short timers for tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.query.row_limit = 100;
    config.query.execution_timeout_secs = 5;
    config.query.translate_timeout_secs = 5;
    config.session.heartbeat_interval_secs = 1;
    config.session.heartbeat_miss_multiplier = 2;
    config.session.grace_window_secs = 60;
    config
}

/// Creates a controller over a mock provider with the chinook fixture loaded
pub fn loaded_controller(provider: MockProvider, config: Config) -> Result<(TempDir, Controller)> {
    init_logging();
    let dir = create_temp_dir()?;
    create_chinook_db(dir.path(), CHINOOK)?;

    let controller = Controller::with_translator(config, Arc::new(LlmTranslator::with_mock(provider)));
    controller.load_databases(&[], Some(dir.path()))?;
    Ok((dir, controller))
}

/// One connected client, seen from the test side of a channel transport
pub struct TestClient {
    pub session_id: String,
    pub transport_id: String,
    rx: mpsc::Receiver<Outbound>,
}

impl TestClient {
    /// Open a fresh session and consume its `connection` frame
    pub async fn connect(dispatcher: &Dispatcher) -> Self {
        Self::open(dispatcher, None).await.0
    }

    /// Open a transport with an optional first frame. Returns the client and
    /// the `connection` acknowledgement it received.
    pub async fn open(dispatcher: &Dispatcher, first: Option<ClientEvent>) -> (Self, ServerEvent) {
        let (transport, rx) = ChannelTransport::channel(64);
        let transport_id = transport.id().to_string();
        let (session_id, pending) = dispatcher.open(Arc::new(transport), first);
        let mut client = Self {
            session_id,
            transport_id,
            rx,
        };
        let ack = client.next_event().await;
        assert_eq!(ack.name(), "connection");
        if let Some(event) = pending {
            dispatcher.handle(&client.session_id, event).await;
        }
        (client, ack)
    }

    /// Next event, failing the test after a few seconds
    pub async fn next_event(&mut self) -> ServerEvent {
        match tokio::time::timeout(Duration::from_secs(5), self.rx.recv()).await {
            Ok(Some(Outbound::Event(event))) => event,
            Ok(Some(Outbound::Close(reason))) => panic!("transport closed: {}", reason),
            Ok(None) => panic!("transport dropped"),
            Err(_) => panic!("no event within 5s"),
        }
    }

    /// Skip events until one with the given name arrives
    pub async fn expect(&mut self, name: &str) -> ServerEvent {
        loop {
            let event = self.next_event().await;
            if event.name() == name {
                return event;
            }
        }
    }

    /// Whether the server asked this transport to close
    pub async fn expect_close(&mut self) -> String {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), self.rx.recv()).await {
                Ok(Some(Outbound::Close(reason))) => return reason,
                Ok(Some(Outbound::Event(_))) => continue,
                Ok(None) => return "dropped".to_string(),
                Err(_) => panic!("transport not closed within 5s"),
            }
        }
    }

    /// Events already delivered, without waiting
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            if let Outbound::Event(event) = message {
                events.push(event);
            }
        }
        events
    }

    pub async fn join(&mut self, dispatcher: &Dispatcher, database_id: &str) -> ServerEvent {
        dispatcher
            .handle(
                &self.session_id,
                ClientEvent::JoinDatabase {
                    database_id: database_id.to_string(),
                },
            )
            .await;
        self.expect("room_joined").await
    }

    pub async fn run_sql(&mut self, dispatcher: &Dispatcher, request_id: &str, sql: &str, override_warnings: bool) {
        dispatcher
            .handle(
                &self.session_id,
                ClientEvent::ExecuteSqlQuery {
                    request_id: Some(request_id.to_string()),
                    database_id: CHINOOK.to_string(),
                    sql: sql.to_string(),
                    override_warnings,
                },
            )
            .await;
    }

    /// Wait for the `query_result` or `query_error` of `request_id`
    pub async fn outcome_of(&mut self, request_id: &str) -> ServerEvent {
        loop {
            let event = self.next_event().await;
            match &event {
                ServerEvent::QueryResult { request_id: id, .. } | ServerEvent::QueryError { request_id: id, .. }
                    if id == request_id =>
                {
                    return event;
                }
                _ => {}
            }
        }
    }
}
