//! Transcription sessions
//!
//! A session pairs one authenticated client socket with one upstream
//! transcription connection. The [`SessionCoordinator`] owns all of a
//! session's mutable state and is the only component that decides a session
//! is over.

pub mod buffer;
pub mod coordinator;
pub mod link;
pub mod protocol;
pub mod state;
pub mod termination;

#[cfg(test)]
mod tests;

use std::time::Duration;

use tokio::time::Instant;

use crate::auth::Identity;
use crate::core::audit::{SessionAuditRecord, unix_millis};

pub use buffer::AudioQueue;
pub use coordinator::{ConnectRejection, SessionCoordinator};
pub use link::{ClientClose, ClientLink, DeliveryError, OutboundFrame};
pub use protocol::{ClientFrame, ControlMessage, OutgoingMessage, ProtocolError};
pub use state::{InvalidTransition, SessionState};
pub use termination::{TerminationReason, close_codes};

/// Per-session data owned by the coordinator
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub identity: Identity,
    pub state: SessionState,
    /// Set by the first control message, never changed afterwards
    pub language_hint: Option<String>,
    /// Unix milliseconds
    pub started_at: u64,
    pub last_activity_at: Instant,
    pub bytes_in: u64,
    pub events_out: u64,
    /// Error code sent to the client before an error teardown
    pub error_code: Option<String>,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            identity,
            state: SessionState::Connecting,
            language_hint: None,
            started_at: unix_millis(),
            last_activity_at: Instant::now(),
            bytes_in: 0,
            events_out: 0,
            error_code: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }

    pub fn audit_record(
        &self,
        reason: TerminationReason,
        ended_at: u64,
        dropped_chunks: u64,
    ) -> SessionAuditRecord {
        SessionAuditRecord {
            session_id: self.session_id.clone(),
            user_id: self.identity.user_id.clone(),
            tenant_id: self.identity.tenant_id.clone(),
            started_at: self.started_at,
            ended_at,
            termination_reason: reason,
            bytes_in: self.bytes_in,
            events_out: self.events_out,
            dropped_chunks,
            error_code: self.error_code.clone(),
        }
    }
}
