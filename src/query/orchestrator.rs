/*!
 * One request/response cycle of the query pipeline.
 *
 * A submission moves through `Received → (Translating) → Validating →
 * (Executing | Rejected) → Completed | Failed`. Natural-language requests are
 * translated against a schema snapshot read at submission time; every
 * statement, typed or generated, is classified before it can reach the
 * engine. Mutating statements run under their room's write lane. The lane is
 * held until the result is formatted, recorded and handed to the originator,
 * and only then is the change broadcast to the other members, so peers see
 * updates in commit order and after the originator's own result.
 */

use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::app_config::QueryConfig;
use crate::database::{executor, DatabaseHandle, DatabaseRegistry, ExecutionOutcome, SchemaSnapshot};
use crate::errors::{ErrorKind, QueryError, SessionError, TranslationError};
use crate::server::protocol::ServerEvent;
use crate::session::{InFlightGuard, SessionManager};
use crate::translation::{Translation, Translator};
use crate::validation::{classify, RiskLevel, SafetyVerdict, StatementKind};

use super::formatter::ResultFormatter;
use super::history::HistoryStore;
use super::models::{HistoryEntry, HistoryOutcome, QueryMode, QueryRequest, QueryResult};
use super::suggestions;

/// Ticket for an admitted submission; dropping it frees the session
#[derive(Debug)]
pub struct Admission {
    handle: Arc<DatabaseHandle>,
    _in_flight: InFlightGuard,
}

/// What a submission got to before it finished
#[derive(Debug, Default)]
struct Trace {
    sql: Option<String>,
    verdict: Option<SafetyVerdict>,
}

/// Change notice waiting for the originator's result to go out first
struct PendingUpdate {
    event: ServerEvent,
    _lane: OwnedMutexGuard<()>,
}

struct Executed {
    result: QueryResult,
    update: Option<PendingUpdate>,
}

/// Composes translation, validation and execution
pub struct QueryOrchestrator {
    registry: Arc<DatabaseRegistry>,
    sessions: Arc<SessionManager>,
    translator: Arc<dyn Translator>,
    history: Arc<HistoryStore>,
    formatter: ResultFormatter,
    config: QueryConfig,
}

impl QueryOrchestrator {
    pub fn new(
        registry: Arc<DatabaseRegistry>,
        sessions: Arc<SessionManager>,
        translator: Arc<dyn Translator>,
        history: Arc<HistoryStore>,
        config: QueryConfig,
    ) -> Self {
        Self {
            formatter: ResultFormatter::new(config.max_cell_chars),
            registry,
            sessions,
            translator,
            history,
            config,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.registry
    }

    /// Admission checks that must happen in submission order: the session
    /// is bound to the request's database, has nothing in flight, and the
    /// database resolves. The returned ticket holds the in-flight slot.
    pub fn admit(&self, request: &QueryRequest) -> Result<Admission, QueryError> {
        self.sessions.ensure_bound(&request.session_id, &request.database_id)?;
        let in_flight = self.sessions.begin_query(&request.session_id)?;
        let handle = self.registry.resolve(&request.database_id)?;
        Ok(Admission {
            handle,
            _in_flight: in_flight,
        })
    }

    /// Run one submission to completion.
    ///
    /// `override_warnings` applies to the exact statement of this request
    /// only; it never turns a `block` verdict into an execution.
    pub async fn submit(&self, request: QueryRequest, override_warnings: bool) -> Result<QueryResult, QueryError> {
        let admission = self.admit(&request);
        self.complete(request, admission, override_warnings).await
    }

    /// Finish a submission whose admission was decided earlier, recording
    /// the outcome in the session's history
    pub async fn complete(
        &self,
        request: QueryRequest,
        admission: Result<Admission, QueryError>,
        override_warnings: bool,
    ) -> Result<QueryResult, QueryError> {
        self.complete_with(request, admission, override_warnings, |_| {}).await
    }

    /// Like [`complete`](Self::complete), handing the outcome to `reply`
    /// after it is recorded and before other room members hear about a
    /// committed change
    pub async fn complete_with<F>(
        &self,
        request: QueryRequest,
        admission: Result<Admission, QueryError>,
        override_warnings: bool,
        reply: F,
    ) -> Result<QueryResult, QueryError>
    where
        F: FnOnce(&Result<QueryResult, QueryError>),
    {
        debug!(
            "Request {} from session {}: {} on {}",
            request.request_id,
            request.session_id,
            request.mode.as_str(),
            request.database_id
        );

        let mut trace = Trace::default();
        let executed = match admission {
            Ok(admission) => self.run(&request, admission, override_warnings, &mut trace).await,
            Err(error) => Err(error),
        };
        let (result, update) = match executed {
            Ok(executed) => (Ok(executed.result), executed.update),
            Err(error) => (Err(error), None),
        };

        match &result {
            Ok(query_result) => {
                info!(
                    "Request {} completed: {} rows in {}ms",
                    request.request_id, query_result.row_count, query_result.execution_time_ms
                );
                self.record(&request, trace.verdict, HistoryOutcome::completed(query_result));
            }
            Err(error) => {
                info!("Request {} failed: {} ({})", request.request_id, error.kind(), error.reason());
                if error.kind() != ErrorKind::SessionNotFound {
                    let outcome = HistoryOutcome::failed(trace.sql, error);
                    self.record(&request, trace.verdict, outcome);
                }
            }
        }

        reply(&result);

        if let Some(update) = update {
            let notified = self
                .sessions
                .broadcast(&request.database_id, &request.session_id, &update.event);
            debug!("Broadcast update of {} to {} sessions", request.database_id, notified);
        }

        result
    }

    fn record(&self, request: &QueryRequest, verdict: Option<SafetyVerdict>, outcome: HistoryOutcome) {
        // A session torn down mid-query must not leave history behind
        let entry = HistoryEntry::new(request, verdict, outcome);
        if !self.sessions.while_live(&request.session_id, || self.history.append(entry)) {
            debug!("Session {} is gone, not recording {}", request.session_id, request.request_id);
        }
    }

    async fn run(
        &self,
        request: &QueryRequest,
        admission: Admission,
        override_warnings: bool,
        trace: &mut Trace,
    ) -> Result<Executed, QueryError> {
        let handle = admission.handle.clone();

        let (sql, explanation) = match request.mode {
            QueryMode::RawSql => (request.text.trim().to_string(), None),
            QueryMode::NaturalLanguage => {
                if request.text.trim().is_empty() {
                    return Err(QueryError::InvalidRequest("empty prompt".to_string()));
                }
                let schema = handle.schema_snapshot().await?;
                let translation = self.translate(&request.text, &schema).await?;
                debug!("Request {} translated to: {}", request.request_id, translation.sql);
                (translation.sql, translation.explanation)
            }
        };
        trace.sql = Some(sql.clone());

        let verdict = classify(&sql);
        trace.verdict = Some(verdict.clone());
        match verdict.risk_level {
            RiskLevel::Block => {
                return Err(QueryError::ValidationBlocked {
                    reasons: verdict.reasons.clone(),
                });
            }
            RiskLevel::Warn if !override_warnings => {
                return Err(QueryError::ValidationWarnNeedsOverride {
                    reasons: verdict.reasons.clone(),
                });
            }
            RiskLevel::Warn => {
                debug!("Request {} runs with overridden warnings", request.request_id);
            }
            RiskLevel::Safe => {}
        }

        if !verdict.statement_kind.is_mutating() {
            let outcome = executor::execute(
                handle.connection(),
                &sql,
                self.config.row_limit,
                self.config.execution_timeout(),
            )
            .await?;
            return Ok(Executed {
                result: self.present(request, &sql, &outcome, explanation, verdict),
                update: None,
            });
        }

        let lane = self.sessions.room(&request.database_id).write_lane().await;

        let outcome = executor::execute(
            handle.connection(),
            &sql,
            self.config.row_limit,
            self.config.execution_timeout(),
        )
        .await?;

        let event = ServerEvent::DatabaseUpdate {
            database_id: request.database_id.clone(),
            session_id: request.session_id.clone(),
            statement_kind: verdict.statement_kind,
            sql: sql.clone(),
            rows_affected: outcome.rows_affected,
            schema_version: self.current_schema_version(&handle, verdict.statement_kind).await,
            timestamp: Utc::now(),
        };

        Ok(Executed {
            result: self.present(request, &sql, &outcome, explanation, verdict),
            update: Some(PendingUpdate { event, _lane: lane }),
        })
    }

    fn present(
        &self,
        request: &QueryRequest,
        sql: &str,
        outcome: &ExecutionOutcome,
        explanation: Option<String>,
        verdict: SafetyVerdict,
    ) -> QueryResult {
        let mut result = self.formatter.format(sql, outcome, explanation, verdict);
        if request.export {
            result.export = Some(ResultFormatter::export(outcome));
        }
        result
    }

    async fn current_schema_version(&self, handle: &DatabaseHandle, kind: StatementKind) -> String {
        let cached = handle.schema_version();
        if kind != StatementKind::Ddl && !cached.is_empty() {
            return cached;
        }
        match handle.refresh_schema_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("Could not refresh schema version of {}: {}", handle.id(), e);
                cached
            }
        }
    }

    /// Translate with the configured number of extra attempts after a timeout
    async fn translate(&self, prompt: &str, schema: &SchemaSnapshot) -> Result<Translation, TranslationError> {
        let timeout = self.config.translate_timeout();
        let mut attempt = 0;

        loop {
            match self.translator.translate(prompt, schema, timeout).await {
                Err(e) if e.is_timeout() && attempt < self.config.translate_retries => {
                    attempt += 1;
                    warn!("Translation timed out, retrying (attempt {})", attempt + 1);
                }
                other => return other,
            }
        }
    }

    /// Related-query prompts for a session's database
    pub async fn suggest(&self, session_id: &str, database_id: &str) -> Result<Vec<String>, QueryError> {
        if !self.sessions.exists(session_id) {
            return Err(SessionError::NotFound(session_id.to_string()).into());
        }
        let handle = self.registry.resolve(database_id)?;
        let schema = handle.schema_snapshot().await?;
        let recent = self.history.recent_sql(session_id, database_id);
        Ok(suggestions::suggest(&schema, &recent))
    }
}
