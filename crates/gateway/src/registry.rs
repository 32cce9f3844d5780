//! Run identifiers and the table of live sessions.

use crate::session::{RunEmitter, RunSession};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Opaque, single-use run identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live sessions keyed by run id.
///
/// The lock is held only for map operations and never across an await.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<RunId, Arc<RunSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session under a fresh id.
    ///
    /// Returns the session and the producer handle for its worker.
    pub fn create(&self) -> (Arc<RunSession>, RunEmitter) {
        let (session, emitter) = RunSession::new(RunId::new());
        let session = Arc::new(session);
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.run_id().clone(), session.clone());
        (session, emitter)
    }

    pub fn get(&self, run_id: &RunId) -> Option<Arc<RunSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(run_id)
            .cloned()
    }

    /// Remove a session. Removing an unknown or already removed id is a no-op.
    pub fn remove(&self, run_id: &RunId) -> Option<Arc<RunSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(run_id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
