/*!
 * Routes inbound client events to sessions and the query pipeline.
 *
 * The dispatcher never touches sockets. Every reply goes through
 * [`SessionManager::send_to`], so a reply produced while the client is
 * disconnected lands in the session's outbound queue and is flushed on
 * resume. Queries run on their own task; a disconnect never cancels them.
 */

use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;

use crate::database::DatabaseRegistry;
use crate::errors::{ErrorKind, QueryError, SessionError};
use crate::query::{QueryMode, QueryOrchestrator, QueryRequest, QueryResult};
use crate::session::{DisconnectReason, ResumeResult, SessionManager, Transport};

use super::protocol::{ClientEvent, ServerEvent};

/// What the connection loop should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    orchestrator: Arc<QueryOrchestrator>,
    registry: Arc<DatabaseRegistry>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionManager>,
        orchestrator: Arc<QueryOrchestrator>,
        registry: Arc<DatabaseRegistry>,
    ) -> Self {
        Self {
            sessions,
            orchestrator,
            registry,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Attach a new transport. A `resume` first frame re-attaches to an
    /// existing session; any other first frame is handled after a fresh
    /// session is created. Returns the session id and the frame still to
    /// be dispatched, if any.
    pub fn open(&self, transport: Arc<dyn Transport>, first: Option<ClientEvent>) -> (String, Option<ClientEvent>) {
        match first {
            Some(ClientEvent::Resume { session_id }) => {
                let result = self.sessions.resume(&session_id, transport);
                if let ResumeResult::NotFound { new_session_id } = &result {
                    debug!("Resume of {} issued new session {}", session_id, new_session_id);
                }
                (result.session_id().to_string(), None)
            }
            other => (self.sessions.connect(transport), other),
        }
    }

    /// Handle one inbound event of an attached session
    pub async fn handle(&self, session_id: &str, event: ClientEvent) -> Flow {
        if self.sessions.touch(session_id).is_err() {
            debug!("Event {} for unknown session {}", event.name(), session_id);
            return Flow::Close;
        }
        debug!("Session {} sent {}", session_id, event.name());

        match event {
            ClientEvent::Resume { .. } => {
                self.reply_error(session_id, ErrorKind::InvalidRequest, "resume is only valid as the first frame");
            }
            ClientEvent::ExecuteSqlQuery {
                request_id,
                database_id,
                sql,
                override_warnings,
            } => {
                self.submit(session_id, request_id, database_id, QueryMode::RawSql, sql, override_warnings);
            }
            ClientEvent::ExecuteNlQuery {
                request_id,
                database_id,
                prompt,
                override_warnings,
            } => {
                self.submit(
                    session_id,
                    request_id,
                    database_id,
                    QueryMode::NaturalLanguage,
                    prompt,
                    override_warnings,
                );
            }
            ClientEvent::JoinDatabase { database_id } => self.join(session_id, &database_id).await,
            ClientEvent::LeaveDatabase => match self.sessions.unbind(session_id) {
                Ok(Some(database_id)) => {
                    self.sessions.send_to(session_id, ServerEvent::RoomLeft { database_id });
                }
                Ok(None) => {
                    self.reply_error(session_id, ErrorKind::SessionNotBound, "no database is bound");
                }
                Err(e) => self.reply_error(session_id, e.kind(), e.to_string()),
            },
            ClientEvent::GetHistory { limit } => {
                let limit = limit.unwrap_or(self.orchestrator.history().capacity());
                let entries = self.orchestrator.history().list(session_id, limit);
                self.sessions.send_to(session_id, ServerEvent::History { entries });
            }
            ClientEvent::GetSuggestions { database_id } => {
                match self.target_database(session_id, database_id) {
                    Ok(database_id) => match self.orchestrator.suggest(session_id, &database_id).await {
                        Ok(suggestions) => {
                            self.sessions.send_to(
                                session_id,
                                ServerEvent::Suggestions {
                                    database_id,
                                    suggestions,
                                },
                            );
                        }
                        Err(e) => self.reply_error(session_id, e.kind(), e.reason()),
                    },
                    Err(e) => self.reply_error(session_id, e.kind(), e.to_string()),
                }
            }
            ClientEvent::GetDatabaseStatus { database_id } => {
                match self.target_database(session_id, database_id) {
                    Ok(database_id) => self.database_status(session_id, database_id).await,
                    Err(e) => self.reply_error(session_id, e.kind(), e.to_string()),
                }
            }
            ClientEvent::GetActiveConnections => {
                let stats = self.sessions.stats();
                self.sessions.send_to(session_id, ServerEvent::ActiveConnections { stats });
            }
            ClientEvent::Ping => {
                self.sessions.send_to(session_id, ServerEvent::Pong { timestamp: Utc::now() });
            }
            // Last-seen was refreshed above
            ClientEvent::Pong => {}
            ClientEvent::Close => {
                self.sessions.disconnect(session_id, DisconnectReason::ClientClosed);
                return Flow::Close;
            }
        }

        Flow::Continue
    }

    /// Report a frame that could not be decoded
    pub fn malformed(&self, session_id: &str, error: &serde_json::Error) {
        warn!("Malformed frame from session {}: {}", session_id, error);
        let _ = self.sessions.touch(session_id);
        self.reply_error(session_id, ErrorKind::InvalidRequest, format!("malformed frame: {}", error));
    }

    /// The I/O side lost its connection
    pub fn transport_closed(&self, session_id: &str, transport_id: &str) {
        self.sessions
            .disconnect_transport(session_id, transport_id, DisconnectReason::TransportLost);
    }

    fn reply_error(&self, session_id: &str, kind: ErrorKind, reason: impl Into<String>) {
        self.sessions.send_to(session_id, ServerEvent::error(kind, reason));
    }

    /// Explicit database id, or the bound one
    fn target_database(&self, session_id: &str, requested: Option<String>) -> Result<String, SessionError> {
        match requested {
            Some(database_id) => Ok(database_id),
            None => self
                .sessions
                .bound_database(session_id)?
                .ok_or_else(|| SessionError::NotBound(session_id.to_string())),
        }
    }

    fn submit(
        &self,
        session_id: &str,
        request_id: Option<String>,
        database_id: String,
        mode: QueryMode,
        text: String,
        override_warnings: bool,
    ) {
        let mut request = QueryRequest::new(session_id, database_id, mode, text);
        if let Some(request_id) = request_id {
            request = request.with_request_id(request_id);
        }

        // Admission runs inline so a second submission sees the first as in flight
        let admission = self.orchestrator.admit(&request);
        if admission.is_ok() {
            self.sessions.send_to(
                session_id,
                ServerEvent::QueryStarted {
                    request_id: request.request_id.clone(),
                    mode,
                },
            );
        }

        let orchestrator = self.orchestrator.clone();
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let session_id = request.session_id.clone();
            let request_id = request.request_id.clone();
            // The originator hears back before peers get the change notice
            let reply = |outcome: &Result<QueryResult, QueryError>| {
                let event = match outcome {
                    Ok(result) => ServerEvent::QueryResult {
                        request_id,
                        result: result.clone(),
                    },
                    Err(error) => ServerEvent::query_error(request_id, error),
                };
                sessions.send_to(&session_id, event);
            };
            let _ = orchestrator
                .complete_with(request, admission, override_warnings, reply)
                .await;
        });
    }

    async fn join(&self, session_id: &str, database_id: &str) {
        let outcome = match self.sessions.bind(session_id, database_id) {
            Ok(outcome) => outcome,
            Err(e) => return self.reply_error(session_id, e.kind(), e.to_string()),
        };

        if let Some(left) = outcome.left {
            self.sessions.send_to(session_id, ServerEvent::RoomLeft { database_id: left });
        }

        let schema_version = match self.registry.resolve(database_id) {
            Ok(handle) => match handle.refresh_schema_version().await {
                Ok(version) => version,
                Err(e) => {
                    warn!("Could not read schema version of {}: {}", database_id, e);
                    handle.schema_version()
                }
            },
            Err(e) => {
                let error = QueryError::from(e);
                return self.reply_error(session_id, error.kind(), error.reason());
            }
        };

        self.sessions.send_to(
            session_id,
            ServerEvent::RoomJoined {
                database_id: database_id.to_string(),
                members: outcome.members,
                schema_version,
            },
        );
    }

    async fn database_status(&self, session_id: &str, database_id: String) {
        let handle = match self.registry.resolve(&database_id) {
            Ok(handle) => handle,
            Err(e) => {
                let error = QueryError::from(e);
                return self.reply_error(session_id, error.kind(), error.reason());
            }
        };

        match handle.schema_snapshot().await {
            Ok(schema) => {
                self.sessions.send_to(
                    session_id,
                    ServerEvent::DatabaseStatus {
                        size_bytes: handle.connection().file_size(),
                        members: self.sessions.room_members(&database_id),
                        database_id,
                        schema,
                    },
                );
            }
            Err(e) => self.reply_error(session_id, e.kind(), e.to_string()),
        }
    }
}
