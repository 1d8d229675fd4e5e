use serde::Serialize;

/// WebSocket close codes sent to transcription clients
pub mod close_codes {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const UNAUTHENTICATED: u16 = 4001;
    pub const RATE_LIMITED: u16 = 4008;
    pub const INACTIVITY_TIMEOUT: u16 = 4009;
    pub const CLIENT_TOO_SLOW: u16 = 4010;
}

/// Why a session ended; recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    ClientClosed,
    InactivityTimeout,
    UpstreamUnavailable,
    UpstreamClosed,
    UpstreamError,
    ProtocolViolation,
    ClientTooSlow,
    ServerShutdown,
    AuthExpired,
}

impl TerminationReason {
    pub fn close_code(self) -> u16 {
        match self {
            TerminationReason::ClientClosed => close_codes::NORMAL,
            TerminationReason::InactivityTimeout => close_codes::INACTIVITY_TIMEOUT,
            TerminationReason::UpstreamUnavailable
            | TerminationReason::UpstreamClosed
            | TerminationReason::UpstreamError => close_codes::INTERNAL_ERROR,
            TerminationReason::ProtocolViolation => close_codes::PROTOCOL_ERROR,
            TerminationReason::ClientTooSlow => close_codes::CLIENT_TOO_SLOW,
            TerminationReason::ServerShutdown => close_codes::GOING_AWAY,
            TerminationReason::AuthExpired => close_codes::UNAUTHENTICATED,
        }
    }

    /// Close frame reason text
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::ClientClosed => "client_closed",
            TerminationReason::InactivityTimeout => "inactivity_timeout",
            TerminationReason::UpstreamUnavailable => "upstream_unavailable",
            TerminationReason::UpstreamClosed => "upstream_closed",
            TerminationReason::UpstreamError => "upstream_error",
            TerminationReason::ProtocolViolation => "protocol_violation",
            TerminationReason::ClientTooSlow => "client_too_slow",
            TerminationReason::ServerShutdown => "server_shutdown",
            TerminationReason::AuthExpired => "auth_expired",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        assert_eq!(TerminationReason::ClientClosed.close_code(), 1000);
        assert_eq!(TerminationReason::InactivityTimeout.close_code(), 4009);
        assert_eq!(TerminationReason::UpstreamUnavailable.close_code(), 1011);
        assert_eq!(TerminationReason::UpstreamClosed.close_code(), 1011);
        assert_eq!(TerminationReason::UpstreamError.close_code(), 1011);
        assert_eq!(TerminationReason::ProtocolViolation.close_code(), 1002);
        assert_eq!(TerminationReason::ClientTooSlow.close_code(), 4010);
        assert_eq!(TerminationReason::ServerShutdown.close_code(), 1001);
        assert_eq!(TerminationReason::AuthExpired.close_code(), 4001);
    }

    #[test]
    fn test_serialized_name_matches_display() {
        for reason in [
            TerminationReason::ClientClosed,
            TerminationReason::InactivityTimeout,
            TerminationReason::UpstreamUnavailable,
            TerminationReason::ClientTooSlow,
            TerminationReason::AuthExpired,
        ] {
            let json = serde_json::to_value(reason).unwrap();
            assert_eq!(json, reason.to_string());
        }
    }
}
