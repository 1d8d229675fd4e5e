use serde::Serialize;

/// Lifecycle state of a transcription session
///
/// Variants are ordered; a session only ever moves to a later state. Skipping
/// ahead is allowed (an authenticated session that never streams goes straight
/// to `Closing`), going back is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Connecting,
    Authenticated,
    Streaming,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl SessionState {
    /// Move to `next`, rejecting any transition that is not strictly forward
    pub fn advance(&mut self, next: SessionState) -> Result<(), InvalidTransition> {
        if next <= *self {
            return Err(InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether audio chunks are accepted in this state
    pub fn accepts_audio(self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Streaming)
    }

    pub fn is_terminating(self) -> bool {
        self >= SessionState::Closing
    }
}
