use anyhow::{Context, Result};
use log::{info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app_config::Config;
use crate::database::DatabaseRegistry;
use crate::errors::{AppError, QueryError};
use crate::query::{ExportTable, HistoryStore, QueryMode, QueryOrchestrator, QueryRequest, QueryResult};
use crate::server::{Dispatcher, TcpServer};
use crate::session::{ChannelTransport, DisconnectReason, SessionManager, Transport};
use crate::translation::{LlmTranslator, Translator};

// @module: Application controller wiring registry, sessions and the query pipeline

/// Owns every long-lived component of a running instance
pub struct Controller {
    config: Config,
    registry: Arc<DatabaseRegistry>,
    sessions: Arc<SessionManager>,
    orchestrator: Arc<QueryOrchestrator>,
}

impl Controller {
    /// Create a controller whose translator is built from the configuration
    pub fn with_config(config: Config) -> Result<Self> {
        let translator = LlmTranslator::from_config(&config.translation)
            .context("Failed to create translator")?;
        Ok(Self::with_translator(config, Arc::new(translator)))
    }

    pub fn with_translator(config: Config, translator: Arc<dyn Translator>) -> Self {
        let registry = Arc::new(DatabaseRegistry::new(&config.server));
        let history = Arc::new(HistoryStore::new(config.query.history_capacity));
        let sessions = Arc::new(SessionManager::new(
            config.session.clone(),
            registry.clone(),
            history.clone(),
        ));
        let orchestrator = Arc::new(QueryOrchestrator::new(
            registry.clone(),
            sessions.clone(),
            translator,
            history,
            config.query.clone(),
        ));

        Self {
            config,
            registry,
            sessions,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            self.sessions.clone(),
            self.orchestrator.clone(),
            self.registry.clone(),
        ))
    }

    /// Load explicit files, then scan `database_dir` if it exists.
    /// Returns the number of databases available afterwards.
    pub fn load_databases(&self, files: &[PathBuf], database_dir: Option<&Path>) -> Result<usize, AppError> {
        for file in files {
            self.registry.load_file(file)?;
        }

        let dir = database_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.server.resolved_database_dir());
        if dir.is_dir() {
            let loaded = self.registry.load_directory(&dir);
            info!("Loaded {} database(s) from {}", loaded.len(), dir.display());
        } else if database_dir.is_some() {
            warn!("Database directory {} does not exist", dir.display());
        }

        Ok(self.registry.list().len())
    }

    /// Serve clients on `bind_address` until `shutdown` resolves
    pub async fn serve<F>(&self, bind_address: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let server = TcpServer::bind(bind_address, self.dispatcher(), self.config.session.transport_buffer).await?;
        self.sessions.spawn_heartbeat();
        let result = server.run_until(shutdown).await;
        self.sessions.shutdown();
        result
    }

    /// Run a single submission on a throwaway session
    pub async fn run_query(
        &self,
        database_id: &str,
        mode: QueryMode,
        text: &str,
        override_warnings: bool,
    ) -> Result<QueryResult, QueryError> {
        self.run_once(database_id, override_warnings, |session_id| {
            QueryRequest::new(session_id, database_id, mode, text)
        })
        .await
    }

    /// Like [`run_query`](Self::run_query), returning untruncated cells
    pub async fn export_query(
        &self,
        database_id: &str,
        mode: QueryMode,
        text: &str,
        override_warnings: bool,
    ) -> Result<ExportTable, QueryError> {
        let result = self
            .run_once(database_id, override_warnings, |session_id| {
                QueryRequest::new(session_id, database_id, mode, text).with_export()
            })
            .await?;
        Ok(result.export.unwrap_or(ExportTable {
            columns: result.columns,
            rows: Vec::new(),
        }))
    }

    async fn run_once<F>(&self, database_id: &str, override_warnings: bool, build: F) -> Result<QueryResult, QueryError>
    where
        F: FnOnce(&str) -> QueryRequest,
    {
        let (transport, _events) = ChannelTransport::channel(self.config.session.transport_buffer);
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let session_id = self.sessions.connect(transport);

        let result = match self.sessions.bind(&session_id, database_id) {
            Ok(_) => self.orchestrator.submit(build(&session_id), override_warnings).await,
            Err(e) => Err(e.into()),
        };

        self.sessions.disconnect(&session_id, DisconnectReason::ClientClosed);
        result
    }
}
