/*!
 * Session manager for client session lifecycle.
 *
 * This module handles:
 * - Creating sessions on first handshake and resuming them after reconnects
 * - Binding sessions to databases and tracking room membership
 * - Queueing outbound events while a session is detached
 * - Heartbeat-driven detection of stale transports and expiry of sessions
 *
 * Lock order: room membership, then the session map, then a single session.
 * A session lock is never held while a room or map lock is taken.
 */

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app_config::SessionConfig;
use crate::database::DatabaseRegistry;
use crate::errors::SessionError;
use crate::query::HistoryStore;
use crate::server::protocol::ServerEvent;

use super::models::{
    BindOutcome, ConnectionStats, DisconnectReason, ResumeResult, SessionState, SweepReport,
    TransportState,
};
use super::room::Room;
use super::transport::Transport;

type SharedSession = Arc<Mutex<SessionState>>;

/// Clears a session's in-flight flag when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    session: SharedSession,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.session.lock().in_flight = false;
    }
}

/// Owns every client session and every room
pub struct SessionManager {
    config: SessionConfig,
    registry: Arc<DatabaseRegistry>,
    history: Arc<HistoryStore>,
    sessions: RwLock<HashMap<String, SharedSession>>,
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    shutdown_tx: watch::Sender<bool>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, registry: Arc<DatabaseRegistry>, history: Arc<HistoryStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            registry,
            history,
            sessions: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            shutdown_tx,
            heartbeat: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn session(&self, session_id: &str) -> Result<SharedSession, SessionError> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Get or create the room of a database
    pub fn room(&self, database_id: &str) -> Arc<Room> {
        if let Some(room) = self.rooms.read().get(database_id) {
            return room.clone();
        }
        self.rooms
            .write()
            .entry(database_id.to_string())
            .or_insert_with(|| Arc::new(Room::new(database_id)))
            .clone()
    }

    pub fn room_members(&self, database_id: &str) -> usize {
        self.rooms.read().get(database_id).map_or(0, |r| r.len())
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Create a fresh session for a new transport and acknowledge it
    pub fn connect(&self, transport: Arc<dyn Transport>) -> String {
        self.connect_inner(transport, None)
    }

    fn connect_inner(&self, transport: Arc<dyn Transport>, previous: Option<String>) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut state = SessionState::new(session_id.clone(), transport);

        deliver(
            &mut state,
            ServerEvent::Connection {
                session_id: session_id.clone(),
                resumed: false,
                previous_session_id: previous,
                bound_database: None,
            },
            self.config.outbound_queue_capacity,
        );

        self.sessions
            .write()
            .insert(session_id.clone(), Arc::new(Mutex::new(state)));

        info!("Session {} connected", &session_id[..8]);
        session_id
    }

    /// Re-attach a transport to a previously issued session.
    ///
    /// Unknown or expired ids never fail: a new session is created and its id
    /// reported. A still-attached previous transport is closed and replaced.
    pub fn resume(&self, session_id: &str, transport: Arc<dyn Transport>) -> ResumeResult {
        let now = Instant::now();
        let grace_window = self.config.grace_window();

        let existing = self.sessions.read().get(session_id).cloned();
        let Some(shared) = existing else {
            debug!("Resume of unknown session {}", session_id);
            let new_session_id = self.connect_inner(transport, Some(session_id.to_string()));
            return ResumeResult::NotFound { new_session_id };
        };

        let mut state = shared.lock();
        if state.is_expired(now, grace_window) {
            drop(state);
            info!("Session {} expired before resume", session_id);
            self.teardown(session_id);
            let new_session_id = self.connect_inner(transport, Some(session_id.to_string()));
            return ResumeResult::NotFound { new_session_id };
        }

        if let TransportState::Attached(old) = &state.transport {
            debug!("Transport {} superseded for session {}", old.id(), session_id);
            old.close("superseded by resume");
        }

        state.transport = TransportState::Attached(transport.clone());
        state.last_seen = now;

        let ack = ServerEvent::Connection {
            session_id: session_id.to_string(),
            resumed: true,
            previous_session_id: None,
            bound_database: state.bound_database.clone(),
        };
        let capacity = self.config.outbound_queue_capacity;
        // The handshake frame goes out first; nothing new is sent until the
        // queue has drained
        let mut pending = std::mem::take(&mut state.outbox);
        pending.push_front(ack);
        let mut flushed = 0;
        while let Some(event) = pending.pop_front() {
            if !state.transport.is_attached() {
                pending.push_front(event);
                break;
            }
            let is_ack = matches!(event, ServerEvent::Connection { .. });
            deliver(&mut state, event, capacity);
            if !is_ack && state.transport.is_attached() {
                flushed += 1;
            }
        }
        if !pending.is_empty() {
            // Re-attach failed mid-flush; keep order for the next resume
            pending.append(&mut state.outbox);
            state.outbox = pending;
        }

        info!("Session {} resumed, {} queued events flushed", &session_id[..session_id.len().min(8)], flushed);

        ResumeResult::Resumed {
            session_id: session_id.to_string(),
            bound_database: state.bound_database.clone(),
            flushed,
        }
    }

    /// Handle loss or close of a session's transport
    pub fn disconnect(&self, session_id: &str, reason: DisconnectReason) {
        if reason.ends_session() {
            if let Ok(shared) = self.session(session_id) {
                if let TransportState::Attached(transport) = &shared.lock().transport {
                    transport.close(reason.as_str());
                }
            }
            self.teardown(session_id);
            return;
        }

        let Ok(shared) = self.session(session_id) else {
            return;
        };
        let mut state = shared.lock();
        detach(&mut state, reason);
    }

    /// Like [`disconnect`](Self::disconnect), but ignored unless `transport_id`
    /// is still the session's attached transport
    pub fn disconnect_transport(&self, session_id: &str, transport_id: &str, reason: DisconnectReason) {
        let Ok(shared) = self.session(session_id) else {
            return;
        };
        if shared.lock().transport.transport_id() != Some(transport_id) {
            debug!(
                "Ignoring {} from superseded transport {} of session {}",
                reason.as_str(),
                transport_id,
                session_id
            );
            return;
        }
        self.disconnect(session_id, reason);
    }

    /// Remove a session, leave its room and drop its history
    fn teardown(&self, session_id: &str) {
        let Some(shared) = self.sessions.write().remove(session_id) else {
            return;
        };
        let bound = shared.lock().bound_database.take();
        if let Some(database_id) = bound {
            self.room(&database_id).leave(session_id);
        }
        self.history.purge(session_id);
        info!("Session {} closed", session_id);
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Run `f` only if the session exists, holding the session map so a
    /// concurrent teardown cannot finish in between. `f` must not touch
    /// rooms or the session map.
    pub fn while_live<F>(&self, session_id: &str, f: F) -> bool
    where
        F: FnOnce(),
    {
        let sessions = self.sessions.read();
        if !sessions.contains_key(session_id) {
            return false;
        }
        f();
        true
    }

    pub fn is_attached(&self, session_id: &str) -> bool {
        self.session(session_id)
            .map(|s| s.lock().transport.is_attached())
            .unwrap_or(false)
    }

    /// Record inbound activity
    pub fn touch(&self, session_id: &str) -> Result<(), SessionError> {
        self.session(session_id)?.lock().last_seen = Instant::now();
        Ok(())
    }

    // =========================================================================
    // Database binding
    // =========================================================================

    /// Bind a session to a database, leaving any previously bound room
    pub fn bind(&self, session_id: &str, database_id: &str) -> Result<BindOutcome, SessionError> {
        if !self.registry.contains(database_id) {
            return Err(SessionError::DatabaseNotFound(database_id.to_string()));
        }

        let shared = self.session(session_id)?;
        let previous = shared.lock().bound_database.replace(database_id.to_string());

        let left = match previous {
            Some(prev) if prev != database_id => {
                self.room(&prev).leave(session_id);
                Some(prev)
            }
            _ => None,
        };
        let room = self.room(database_id);
        let members = room.join(session_id);

        // A teardown that ran since the lookup may already have left the room
        if !self.exists(session_id) {
            room.leave(session_id);
            return Err(SessionError::NotFound(session_id.to_string()));
        }

        info!("Session {} bound to {} ({} members)", session_id, database_id, members);
        Ok(BindOutcome { left, members })
    }

    /// Leave the bound room, returning the database that was bound
    pub fn unbind(&self, session_id: &str) -> Result<Option<String>, SessionError> {
        let shared = self.session(session_id)?;
        let previous = shared.lock().bound_database.take();
        if let Some(database_id) = &previous {
            self.room(database_id).leave(session_id);
            debug!("Session {} left {}", session_id, database_id);
        }
        Ok(previous)
    }

    pub fn bound_database(&self, session_id: &str) -> Result<Option<String>, SessionError> {
        Ok(self.session(session_id)?.lock().bound_database.clone())
    }

    /// Fail unless the session is bound to exactly `database_id`
    pub fn ensure_bound(&self, session_id: &str, database_id: &str) -> Result<(), SessionError> {
        match self.bound_database(session_id)? {
            Some(bound) if bound == database_id => Ok(()),
            _ => Err(SessionError::NotBound(session_id.to_string())),
        }
    }

    /// Mark a query in flight. Fails with `Busy` if one already is.
    pub fn begin_query(&self, session_id: &str) -> Result<InFlightGuard, SessionError> {
        let shared = self.session(session_id)?;
        {
            let mut state = shared.lock();
            if state.in_flight {
                return Err(SessionError::Busy(session_id.to_string()));
            }
            state.in_flight = true;
        }
        Ok(InFlightGuard { session: shared })
    }

    // =========================================================================
    // Outbound delivery
    // =========================================================================

    /// Deliver or queue an event for one session. Returns false if the
    /// session no longer exists.
    pub fn send_to(&self, session_id: &str, event: ServerEvent) -> bool {
        let Ok(shared) = self.session(session_id) else {
            debug!("Dropping {} for closed session {}", event.name(), session_id);
            return false;
        };
        let mut state = shared.lock();
        deliver(&mut state, event, self.config.outbound_queue_capacity);
        true
    }

    /// Send an event to every member of a room except `origin`
    pub fn broadcast(&self, database_id: &str, origin: &str, event: &ServerEvent) -> usize {
        let room = self.room(database_id);
        room.for_each_other(origin, |member| {
            self.send_to(member, event.clone());
        })
    }

    // =========================================================================
    // Heartbeat and maintenance
    // =========================================================================

    /// Detach silent transports and tear down sessions past their grace window
    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        let stale_after = self.config.stale_after();
        let grace_window = self.config.grace_window();
        let sessions: Vec<(String, SharedSession)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();

        let mut report = SweepReport::default();
        for (session_id, shared) in sessions {
            let mut state = shared.lock();
            if state.is_expired(now, grace_window) {
                report.expired.push(session_id);
            } else if state.transport.is_attached()
                && now.saturating_duration_since(state.last_seen) > stale_after
            {
                warn!("Session {} missed heartbeats, detaching transport", session_id);
                detach(&mut state, DisconnectReason::HeartbeatTimeout);
                report.stale.push(session_id);
            }
        }

        for session_id in &report.expired {
            self.teardown(session_id);
        }
        report
    }

    /// Ping every attached transport
    pub fn ping_all(&self) {
        let sessions: Vec<SharedSession> = self.sessions.read().values().cloned().collect();
        for shared in sessions {
            let mut state = shared.lock();
            if state.transport.is_attached() {
                deliver(&mut state, ServerEvent::ping(), self.config.outbound_queue_capacity);
            }
        }
    }

    /// Start the background heartbeat task
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.heartbeat_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        debug!("Heartbeat checker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        let report = manager.sweep_at(Instant::now());
                        if !report.expired.is_empty() {
                            info!("Expired {} sessions", report.expired.len());
                        }
                        manager.ping_all();
                    }
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Close every transport and stop the heartbeat checker
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }

        let sessions: Vec<SharedSession> = self.sessions.write().drain().map(|(_, s)| s).collect();
        info!("Shutting down {} sessions", sessions.len());
        for shared in sessions {
            if let TransportState::Attached(transport) = &shared.lock().transport {
                transport.close("server shutting down");
            }
        }
        self.rooms.write().clear();
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats::default();
        let sessions: Vec<SharedSession> = self.sessions.read().values().cloned().collect();
        for shared in sessions {
            let state = shared.lock();
            stats.total_sessions += 1;
            if state.transport.is_attached() {
                stats.attached_sessions += 1;
            } else {
                stats.detached_sessions += 1;
            }
            if state.in_flight {
                stats.queries_in_flight += 1;
            }
        }
        for (database_id, room) in self.rooms.read().iter() {
            let members = room.len();
            if members > 0 {
                stats.rooms.insert(database_id.clone(), members);
            }
        }
        stats
    }

    /// Events waiting for a detached session
    pub fn queued(&self, session_id: &str) -> usize {
        self.session(session_id).map_or(0, |s| s.lock().outbox.len())
    }
}

/// Send to the attached transport, or queue. A transport that refuses the
/// event is detached and the event queued for the next resume.
fn deliver(state: &mut SessionState, event: ServerEvent, capacity: usize) {
    if let TransportState::Attached(transport) = &state.transport {
        match transport.send(&event) {
            Ok(()) => return,
            Err(e) => {
                warn!("Transport {} of session {} failed: {}", transport.id(), state.id, e);
                detach(state, DisconnectReason::TransportLost);
            }
        }
    }

    if state.outbox.len() >= capacity.max(1) {
        if let Some(dropped) = state.outbox.pop_front() {
            warn!("Outbound queue of session {} full, dropped {}", state.id, dropped.name());
        }
    }
    state.outbox.push_back(event);
}

fn detach(state: &mut SessionState, reason: DisconnectReason) {
    if let TransportState::Attached(transport) = &state.transport {
        transport.close(reason.as_str());
        info!("Session {} detached: {}", state.id, reason.as_str());
        state.transport = TransportState::Detached { since: Instant::now() };
    }
}
