/*!
 * Newline-delimited JSON over TCP.
 *
 * Each connection gets a [`ChannelTransport`] whose receiving end is drained
 * by a writer task, and a read loop that feeds decoded frames to the
 * [`Dispatcher`]. Closing the transport stops the writer even while it is
 * stuck on a client that does not read, which in turn ends the read loop.
 * The first frame decides the session: `resume` re-attaches
 * to an existing one, anything else (or silence for the handshake window)
 * creates a fresh session.
 */

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use crate::session::{ChannelTransport, Outbound, Transport};

use super::dispatcher::{Dispatcher, Flow};
use super::protocol;

/// How long a new connection may stay silent before a session is created
const HANDSHAKE_WINDOW: Duration = Duration::from_secs(2);

pub struct TcpServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    transport_buffer: usize,
}

impl TcpServer {
    pub async fn bind(addr: &str, dispatcher: Arc<Dispatcher>, transport_buffer: usize) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self {
            listener,
            dispatcher,
            transport_buffer,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Listening on {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!("New connection from {}", peer);
                        let dispatcher = self.dispatcher.clone();
                        let buffer = self.transport_buffer;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher, buffer).await {
                                warn!("Connection {} ended with error: {:#}", peer, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
            }
        }

        Ok(())
    }
}

/// Resolves once the transport is closed or dropped
async fn closed(signal: &mut watch::Receiver<Option<String>>) {
    let _ = signal.wait_for(Option::is_some).await;
}

async fn write_frames<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>, mut close: watch::Receiver<Option<String>>)
where
    W: AsyncWrite + Unpin,
{
    loop {
        // Queued events go first; the signal only wins on an empty channel
        let message = tokio::select! {
            biased;
            message = rx.recv() => message,
            _ = closed(&mut close) => None,
        };
        let Some(message) = message else {
            debug!("Writer stopping: transport closed");
            break;
        };

        match message {
            Outbound::Event(event) => {
                let frame = match protocol::encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Failed to encode {}: {}", event.name(), e);
                        continue;
                    }
                };
                let line = format!("{}\n", frame);
                tokio::select! {
                    biased;
                    written = writer.write_all(line.as_bytes()) => {
                        if let Err(e) = written {
                            debug!("Write failed: {}", e);
                            break;
                        }
                    }
                    _ = closed(&mut close) => {
                        debug!("Dropping {} for a client that stopped reading", event.name());
                        break;
                    }
                }
            }
            Outbound::Close(reason) => {
                debug!("Closing connection: {}", reason);
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn handle_connection(stream: TcpStream, dispatcher: Arc<Dispatcher>, buffer: usize) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (transport, rx) = ChannelTransport::channel(buffer);
    let transport_id = transport.id().to_string();
    let mut writer_task = tokio::spawn(write_frames(writer, rx, transport.close_signal()));

    let first = match tokio::time::timeout(HANDSHAKE_WINDOW, lines.next_line()).await {
        Ok(Ok(Some(line))) => Some(line),
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => None,
    };

    let (first_event, first_error) = match first.as_deref().map(str::trim) {
        Some(line) if !line.is_empty() => match protocol::decode(line) {
            Ok(event) => (Some(event), None),
            Err(e) => (None, Some(e)),
        },
        _ => (None, None),
    };

    let transport: Arc<dyn Transport> = Arc::new(transport);
    let (session_id, pending) = dispatcher.open(transport, first_event);
    if let Some(e) = first_error {
        dispatcher.malformed(&session_id, &e);
    }

    let mut closed_by_client = false;
    if let Some(event) = pending {
        closed_by_client = dispatcher.handle(&session_id, event).await == Flow::Close;
    }

    while !closed_by_client {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match protocol::decode(line) {
                        Ok(event) => {
                            closed_by_client = dispatcher.handle(&session_id, event).await == Flow::Close;
                        }
                        Err(e) => dispatcher.malformed(&session_id, &e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Read error on session {}: {}", session_id, e);
                    break;
                }
            },
            // Superseded, timed out or failed writer; reading on is pointless
            _ = &mut writer_task => {
                debug!("Writer of session {} finished", session_id);
                dispatcher.transport_closed(&session_id, &transport_id);
                return Ok(());
            }
        }
    }

    if !closed_by_client {
        dispatcher.transport_closed(&session_id, &transport_id);
    }
    // The writer exits on the close notice; give it a moment to flush
    let _ = tokio::time::timeout(Duration::from_secs(1), &mut writer_task).await;
    writer_task.abort();
    Ok(())
}
