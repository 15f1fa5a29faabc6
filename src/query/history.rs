/*!
 * Bounded per-session query log.
 *
 * Each session gets a ring buffer of `capacity` entries; appending to a full
 * buffer silently evicts the oldest entry. Entries live for the lifetime of
 * the session and are purged on teardown.
 */

use log::debug;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

use super::models::HistoryEntry;

pub struct HistoryStore {
    capacity: usize,
    entries: RwLock<HashMap<String, VecDeque<HistoryEntry>>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, entry: HistoryEntry) {
        let mut entries = self.entries.write();
        let log = entries.entry(entry.session_id.clone()).or_default();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// The newest `limit` entries of a session, most recent last
    pub fn list(&self, session_id: &str, limit: usize) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        match entries.get(session_id) {
            Some(log) => {
                let skip = log.len().saturating_sub(limit);
                log.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.entries.read().get(session_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, session_id: &str) -> bool {
        self.len(session_id) == 0
    }

    pub fn purge(&self, session_id: &str) {
        if let Some(log) = self.entries.write().remove(session_id) {
            debug!("Purged {} history entries of session {}", log.len(), session_id);
        }
    }

    /// Statements that completed successfully against a database, newest first
    pub fn recent_sql(&self, session_id: &str, database_id: &str) -> Vec<String> {
        let entries = self.entries.read();
        let Some(log) = entries.get(session_id) else {
            return Vec::new();
        };

        log.iter()
            .rev()
            .filter(|e| e.database_id == database_id && e.outcome.is_success())
            .filter_map(|e| e.outcome.sql().map(str::to_string))
            .collect()
    }
}
