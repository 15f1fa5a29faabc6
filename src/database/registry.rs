/*!
 * Registry of loaded databases.
 *
 * Databases are identified by their file name (`chinook.db`). The registry
 * only opens existing files with an allowed extension and below the size
 * ceiling; sessions refer to databases by id and resolve them here on every
 * request.
 */

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

use super::connection::DatabaseConnection;
use super::schema::{self, SchemaSnapshot};
use crate::app_config::ServerConfig;
use crate::errors::{ExecutionError, RegistryError};

/// A loaded database shared by every session bound to it
#[derive(Debug)]
pub struct DatabaseHandle {
    id: String,
    connection: DatabaseConnection,
    /// Schema version seen by the most recent snapshot
    schema_version: RwLock<String>,
}

impl DatabaseHandle {
    pub fn new(id: impl Into<String>, connection: DatabaseConnection) -> Self {
        Self {
            id: id.into(),
            connection,
            schema_version: RwLock::new(String::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    pub fn schema_version(&self) -> String {
        self.schema_version.read().clone()
    }

    /// Read a fresh schema snapshot and remember its version
    pub async fn schema_snapshot(&self) -> Result<SchemaSnapshot, ExecutionError> {
        let snapshot = self
            .connection
            .execute_async(|conn| Ok(schema::read_snapshot(conn)?))
            .await
            .map_err(|e| ExecutionError::Io(format!("failed to read schema: {:#}", e)))?;

        *self.schema_version.write() = snapshot.version.clone();
        Ok(snapshot)
    }

    /// Recompute only the schema version, without counting rows
    pub async fn refresh_schema_version(&self) -> Result<String, ExecutionError> {
        let version = self
            .connection
            .execute_async(|conn| Ok(schema::schema_version(conn)?))
            .await
            .map_err(|e| ExecutionError::Io(format!("failed to read schema version: {:#}", e)))?;

        *self.schema_version.write() = version.clone();
        Ok(version)
    }
}

/// Summary of a loaded database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub id: String,
    pub path: String,
    pub size_bytes: u64,
}

/// Owns every loaded database
pub struct DatabaseRegistry {
    databases: RwLock<HashMap<String, Arc<DatabaseHandle>>>,
    allowed_extensions: Vec<String>,
    max_database_size: u64,
}

impl DatabaseRegistry {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            max_database_size: config.max_database_size,
        }
    }

    fn is_allowed(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.allowed_extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    /// Open a database file and register it under its file name.
    /// Loading a file whose id is already registered replaces the old handle.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<Arc<DatabaseHandle>, RegistryError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        if !self.is_allowed(path) {
            return Err(RegistryError::Unsupported(format!(
                "{} (allowed: {})",
                display,
                self.allowed_extensions.join(", ")
            )));
        }

        let metadata = std::fs::metadata(path).map_err(|e| RegistryError::Open {
            path: display.clone(),
            message: e.to_string(),
        })?;
        if metadata.len() > self.max_database_size {
            return Err(RegistryError::Unsupported(format!(
                "{} is {} bytes, above the {} byte limit",
                display,
                metadata.len(),
                self.max_database_size
            )));
        }

        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RegistryError::Unsupported(display.clone()))?;

        let connection = DatabaseConnection::open(path).map_err(|e| RegistryError::Open {
            path: display.clone(),
            message: format!("{:#}", e),
        })?;

        info!("Loaded database '{}' from {}", id, display);
        Ok(self.register(id, connection))
    }

    /// Load every allowed file below `dir`. Files that fail to open are
    /// skipped with a warning. Returns the ids that were loaded.
    pub fn load_directory<P: AsRef<Path>>(&self, dir: P) -> Vec<String> {
        let mut loaded = Vec::new();

        for entry in WalkDir::new(dir.as_ref())
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !self.is_allowed(path) {
                continue;
            }

            match self.load_file(path) {
                Ok(handle) => loaded.push(handle.id().to_string()),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        debug!("Loaded {} database(s) from {}", loaded.len(), dir.as_ref().display());
        loaded
    }

    /// Register an already-open connection
    pub fn register(&self, id: impl Into<String>, connection: DatabaseConnection) -> Arc<DatabaseHandle> {
        let handle = Arc::new(DatabaseHandle::new(id, connection));
        self.databases
            .write()
            .insert(handle.id().to_string(), handle.clone());
        handle
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<DatabaseHandle>, RegistryError> {
        self.databases
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.databases.read().contains_key(id)
    }

    pub async fn schema_snapshot(&self, handle: &DatabaseHandle) -> Result<SchemaSnapshot, ExecutionError> {
        handle.schema_snapshot().await
    }

    /// Loaded databases, sorted by id
    pub fn list(&self) -> Vec<DatabaseInfo> {
        let mut infos: Vec<DatabaseInfo> = self
            .databases
            .read()
            .values()
            .map(|h| DatabaseInfo {
                id: h.id().to_string(),
                path: h.connection().path().display().to_string(),
                size_bytes: h.connection().file_size(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn remove(&self, id: &str) -> Option<Arc<DatabaseHandle>> {
        self.databases.write().remove(id)
    }
}
