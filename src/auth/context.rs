use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Authenticated caller identity
///
/// Produced by the session authenticator from a validated access token and
/// attached to the session for its whole lifetime. It never changes after
/// the handshake; the session ends once `expires_at` has passed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Subject of the token
    pub user_id: String,
    /// Organization the user belongs to
    pub tenant_id: String,
    /// Token expiry in Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Time left before the token expires, zero once it has
    pub fn remaining_validity(&self, now_unix_millis: u64) -> Option<Duration> {
        let expires_ms = self.expires_at?.saturating_mul(1000);
        Some(Duration::from_millis(expires_ms.saturating_sub(now_unix_millis)))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user_id, self.tenant_id)
    }
}
