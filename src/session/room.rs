/*!
 * Rooms: the set of sessions bound to one database.
 */

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Membership of one database plus its write lane
#[derive(Debug)]
pub struct Room {
    database_id: String,
    members: Mutex<BTreeSet<String>>,
    /// Held across execution and broadcast of mutating statements
    write_lane: Arc<AsyncMutex<()>>,
}

impl Room {
    pub fn new(database_id: impl Into<String>) -> Self {
        Self {
            database_id: database_id.into(),
            members: Mutex::new(BTreeSet::new()),
            write_lane: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// Add a member, returning the new member count
    pub fn join(&self, session_id: &str) -> usize {
        let mut members = self.members.lock();
        members.insert(session_id.to_string());
        members.len()
    }

    /// Remove a member, returning whether it was present
    pub fn leave(&self, session_id: &str) -> bool {
        self.members.lock().remove(session_id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.members.lock().contains(session_id)
    }

    /// Run `deliver` for every member except `origin` while membership is
    /// frozen. Returns the number of members visited.
    pub fn for_each_other<F>(&self, origin: &str, mut deliver: F) -> usize
    where
        F: FnMut(&str),
    {
        let members = self.members.lock();
        let mut visited = 0;
        for member in members.iter().filter(|m| m.as_str() != origin) {
            deliver(member);
            visited += 1;
        }
        visited
    }

    /// The guard is owned so it can outlive the borrow of the room
    pub async fn write_lane(&self) -> OwnedMutexGuard<()> {
        self.write_lane.clone().lock_owned().await
    }
}
