//! Process-wide table of live transcription sessions

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;

use crate::auth::Identity;

/// One live session as seen from outside its coordinator
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub identity: Identity,
    /// Unix milliseconds
    pub started_at: u64,
    /// Signalled to ask the session to close itself
    pub shutdown: Arc<Notify>,
}

/// Serializable view of a registry entry
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub started_at: u64,
}

/// Registry of live sessions keyed by session id
///
/// Locks are held only for the map operation itself and never across an
/// await point. The coordinator owns insertion and removal; everyone else
/// reads or signals shutdown.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// Fired when a removal leaves the registry empty
    emptied: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, refusing a duplicate id
    pub fn register(&self, entry: SessionEntry) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&entry.session_id) {
            return false;
        }
        sessions.insert(entry.session_id.clone(), entry);
        true
    }

    /// Remove a session; returns the entry if it was present
    pub fn remove(&self, session_id: &str) -> Option<SessionEntry> {
        let (removed, now_empty) = {
            let mut sessions = self.sessions.write();
            let removed = sessions.remove(session_id);
            (removed, sessions.is_empty())
        };
        if removed.is_some() && now_empty {
            self.emptied.notify_waiters();
        }
        removed
    }

    /// Resolve once no session is registered
    pub async fn wait_until_empty(&self) {
        loop {
            // Created before the check so a removal in between is not missed
            let emptied = self.emptied.notified();
            if self.is_empty() {
                return;
            }
            emptied.await;
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Live sessions owned by one user
    pub fn sessions_for_user(&self, user_id: &str) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|entry| entry.identity.user_id == user_id)
            .count()
    }

    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .read()
            .values()
            .map(|entry| SessionSummary {
                session_id: entry.session_id.clone(),
                user_id: entry.identity.user_id.clone(),
                tenant_id: entry.identity.tenant_id.clone(),
                started_at: entry.started_at,
            })
            .collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }

    /// Ask one session to close
    pub fn request_shutdown(&self, session_id: &str) -> bool {
        match self.sessions.read().get(session_id) {
            Some(entry) => {
                entry.shutdown.notify_one();
                true
            }
            None => false,
        }
    }

    /// Ask every live session to close; returns how many were signalled
    ///
    /// `notify_one` stores a permit, so a session that is not currently
    /// waiting still observes the request on its next loop turn.
    pub fn shutdown_all(&self) -> usize {
        let sessions = self.sessions.read();
        for entry in sessions.values() {
            entry.shutdown.notify_one();
        }
        sessions.len()
    }
}
