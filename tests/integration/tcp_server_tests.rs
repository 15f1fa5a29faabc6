/*!
 * Full stack over a TCP socket with newline-delimited JSON frames
 */

use anyhow::Result;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use sqlwai::server::TcpServer;
use sqlwai::Controller;

use crate::common::{self, mock_providers, CHINOOK};

struct WireClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl WireClient {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        let (reader, writer) = TcpStream::connect(addr).await?.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn send(&mut self, frame: Value) -> Result<()> {
        self.writer.write_all(format!("{}\n", frame).as_bytes()).await?;
        Ok(())
    }

    async fn send_raw(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(format!("{}\n", line).as_bytes()).await?;
        Ok(())
    }

    async fn next(&mut self) -> Result<Value> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await??
            .ok_or_else(|| anyhow::anyhow!("connection closed"))?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Skip frames until one with the given event name arrives
    async fn expect(&mut self, event: &str) -> Result<Value> {
        loop {
            let frame = self.next().await?;
            if frame["event"] == event {
                return Ok(frame);
            }
        }
    }
}

async fn start_server(controller: &Controller) -> Result<(SocketAddr, oneshot::Sender<()>)> {
    let server = TcpServer::bind("127.0.0.1:0", controller.dispatcher(), 64).await?;
    let addr = server.local_addr()?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));
    Ok((addr, stop_tx))
}

#[tokio::test]
async fn test_tcp_queryOverSocket_shouldStreamEventsAsJsonLines() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let (addr, stop) = start_server(&controller).await?;

    let mut client = WireClient::connect(addr).await?;
    client
        .send(json!({"event": "join_database", "payload": {"database_id": CHINOOK}}))
        .await?;

    let connection = client.next().await?;
    assert_eq!(connection["event"], "connection");
    assert_eq!(connection["payload"]["resumed"], false);
    let joined = client.next().await?;
    assert_eq!(joined["event"], "room_joined");
    assert_eq!(joined["payload"]["members"], 1);

    client
        .send(json!({
            "event": "execute_sql_query",
            "payload": {"request_id": "t1", "database_id": CHINOOK, "sql": "SELECT name, email FROM customers WHERE id = 2 LIMIT 1"}
        }))
        .await?;
    assert_eq!(client.next().await?["event"], "query_started");
    let result = client.expect("query_result").await?;
    assert_eq!(result["payload"]["request_id"], "t1");
    assert_eq!(result["payload"]["result"]["rows"], json!([["Niklas Schröder", null]]));
    assert_eq!(result["payload"]["result"]["verdict"]["risk_level"], "safe");

    client
        .send(json!({
            "event": "execute_sql_query",
            "payload": {"request_id": "t2", "database_id": CHINOOK, "sql": "DROP TABLE customers"}
        }))
        .await?;
    let error = client.expect("query_error").await?;
    assert_eq!(error["payload"]["kind"], "validation_blocked");
    assert_eq!(error["payload"]["reasons"], json!(["destructive schema operation"]));

    client.send(json!({"event": "ping"})).await?;
    assert_eq!(client.expect("pong").await?["event"], "pong");

    let _ = stop.send(());
    Ok(())
}

#[tokio::test]
async fn test_tcp_malformedFrame_shouldReplyWithErrorAndKeepConnection() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let (addr, stop) = start_server(&controller).await?;

    let mut client = WireClient::connect(addr).await?;
    client.send_raw("{not json").await?;
    assert_eq!(client.next().await?["event"], "connection");
    let error = client.next().await?;
    assert_eq!(error["event"], "error");
    assert_eq!(error["payload"]["kind"], "invalid_request");

    client.send(json!({"event": "get_active_connections"})).await?;
    let stats = client.expect("active_connections").await?;
    assert_eq!(stats["payload"]["stats"]["total_sessions"], 1);

    let _ = stop.send(());
    Ok(())
}

#[tokio::test]
async fn test_tcp_reconnectWithResume_shouldRestoreSession() -> Result<()> {
    let (_dir, controller) = common::loaded_controller(mock_providers::chinook_provider(), common::test_config())?;
    let (addr, stop) = start_server(&controller).await?;

    let mut first = WireClient::connect(addr).await?;
    first
        .send(json!({"event": "join_database", "payload": {"database_id": CHINOOK}}))
        .await?;
    let session_id = first.next().await?["payload"]["session_id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing session id"))?;
    first.expect("room_joined").await?;
    drop(first);

    // Wait for the server to notice the dropped socket
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while controller.sessions().is_attached(&session_id) {
        assert!(std::time::Instant::now() < deadline, "transport never detached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut second = WireClient::connect(addr).await?;
    second
        .send(json!({"event": "resume", "payload": {"session_id": session_id}}))
        .await?;
    let connection = second.next().await?;
    assert_eq!(connection["event"], "connection");
    assert_eq!(connection["payload"]["session_id"], session_id.as_str());
    assert_eq!(connection["payload"]["resumed"], true);
    assert_eq!(connection["payload"]["bound_database"], CHINOOK);

    second.send(json!({"event": "close"})).await?;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while controller.sessions().exists(&session_id) {
        assert!(std::time::Instant::now() < deadline, "session never closed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let _ = stop.send(());
    Ok(())
}
