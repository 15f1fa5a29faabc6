/*!
 * Session state and the DTOs handed out by the session manager.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::server::protocol::ServerEvent;

use super::transport::Transport;

/// Liveness of a session's connection
#[derive(Debug, Clone)]
pub enum TransportState {
    Attached(Arc<dyn Transport>),
    Detached { since: Instant },
}

impl TransportState {
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached(_))
    }

    /// Id of the attached transport, if any
    pub fn transport_id(&self) -> Option<&str> {
        match self {
            Self::Attached(transport) => Some(transport.id()),
            Self::Detached { .. } => None,
        }
    }
}

/// Mutable state of one client session
#[derive(Debug)]
pub struct SessionState {
    pub id: String,
    pub transport: TransportState,
    pub bound_database: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last inbound frame of any kind
    pub last_seen: Instant,
    pub in_flight: bool,
    /// Events produced while no transport could take them
    pub outbox: VecDeque<ServerEvent>,
}

impl SessionState {
    pub fn new(id: String, transport: Arc<dyn Transport>) -> Self {
        Self {
            id,
            transport: TransportState::Attached(transport),
            bound_database: None,
            created_at: Utc::now(),
            last_seen: Instant::now(),
            in_flight: false,
            outbox: VecDeque::new(),
        }
    }

    /// Whether a detached session is past its grace window at `now`
    pub fn is_expired(&self, now: Instant, grace_window: std::time::Duration) -> bool {
        match self.transport {
            TransportState::Detached { since } => now.saturating_duration_since(since) > grace_window,
            TransportState::Attached(_) => false,
        }
    }
}

/// Why a transport went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client asked to end the session
    ClientClosed,
    /// The connection dropped; the session stays resumable
    TransportLost,
    /// Nothing arrived within the heartbeat window
    HeartbeatTimeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client closed",
            Self::TransportLost => "transport lost",
            Self::HeartbeatTimeout => "heartbeat timeout",
        }
    }

    /// Only an explicit close ends the session immediately
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::ClientClosed)
    }
}

/// Result of presenting a previously issued session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeResult {
    Resumed {
        session_id: String,
        bound_database: Option<String>,
        /// Queued events delivered on re-attach
        flushed: usize,
    },
    /// The id was unknown or expired; a fresh session was created
    NotFound { new_session_id: String },
}

impl ResumeResult {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Resumed { session_id, .. } => session_id,
            Self::NotFound { new_session_id } => new_session_id,
        }
    }
}

/// Room change caused by a bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// Room that was left, if the session switched databases
    pub left: Option<String>,
    /// Members of the joined room, including this session
    pub members: usize,
}

/// Sessions affected by one heartbeat sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Attached sessions detached for silence
    pub stale: Vec<String>,
    /// Detached sessions torn down after the grace window
    pub expired: Vec<String>,
}

/// Snapshot of connection counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub total_sessions: usize,
    pub attached_sessions: usize,
    pub detached_sessions: usize,
    pub queries_in_flight: usize,
    /// Member count per non-empty room
    pub rooms: BTreeMap<String, usize>,
}
