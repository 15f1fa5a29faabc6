/*!
 * Transport seam between session state and connection I/O.
 *
 * Sessions never write to sockets. They hand events to a [`Transport`], which
 * must not block: a transport that cannot accept an event right away reports
 * an error and the session falls back to its outbound queue.
 *
 * Closing has to reach the I/O side even when the event channel is full, so
 * [`ChannelTransport`] also raises a close signal the writer watches next to
 * the channel.
 */

use log::debug;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::server::protocol::ServerEvent;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("transport buffer is full")]
    Full,

    #[error("transport is closed")]
    Closed,
}

/// A live bidirectional connection to one client
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Unique per connection; a resumed session gets a new transport id
    fn id(&self) -> &str;

    /// Deliver an event without blocking
    fn send(&self, event: &ServerEvent) -> Result<(), TransportError>;

    /// Ask the I/O side to shut the connection down. Never blocks.
    fn close(&self, reason: &str);
}

/// Message from the session layer to a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ServerEvent),
    Close(String),
}

/// Transport backed by a bounded channel drained by a writer task
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    id: String,
    sender: mpsc::Sender<Outbound>,
    closed: Arc<watch::Sender<Option<String>>>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        let (closed, _) = watch::channel(None);
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            closed: Arc::new(closed),
        }
    }

    /// Create a transport and the receiving end for its writer
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self::new(sender), receiver)
    }

    /// Holds the close reason once the transport is closed
    pub fn close_signal(&self) -> watch::Receiver<Option<String>> {
        self.closed.subscribe()
    }
}

impl Transport for ChannelTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, event: &ServerEvent) -> Result<(), TransportError> {
        self.sender
            .try_send(Outbound::Event(event.clone()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::Full,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            })
    }

    fn close(&self, reason: &str) {
        self.closed.send_replace(Some(reason.to_string()));
        if self.sender.try_send(Outbound::Close(reason.to_string())).is_err() {
            debug!("Transport {} close notice not queued, relying on the signal", self.id);
        }
    }
}
