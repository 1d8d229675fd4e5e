//! Per-session limits and admission settings

use std::time::Duration;

/// Sliding-window admission limits, applied per user id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Session starts allowed inside one window
    pub max_sessions: u32,
    /// Length of the rolling window in seconds
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            window_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Timeouts and queue bounds for a single transcription session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle time (no audio in, no transcript out) before the session is closed with 4009
    pub inactivity_timeout_seconds: u64,
    /// How often the inactivity deadline is checked
    pub inactivity_check_interval_ms: u64,
    /// Upper bound for establishing the upstream connection
    pub connect_timeout_seconds: u64,
    /// Audio chunks kept while waiting for the control message
    pub pre_stream_buffer_chunks: usize,
    /// Audio chunks queued for the upstream once streaming
    pub audio_queue_chunks: usize,
    /// Transcription events queued for the client socket
    pub outbound_queue_events: usize,
    /// Consecutive malformed client messages tolerated before closing with 1002
    pub max_consecutive_protocol_errors: u32,
    /// Time the upstream gets to drain and close during teardown
    pub upstream_close_grace_ms: u64,
    /// Time the client writer gets to flush the close frame
    pub client_close_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_seconds: 30,
            inactivity_check_interval_ms: 1000,
            connect_timeout_seconds: 5,
            pre_stream_buffer_chunks: 5,
            audio_queue_chunks: 32,
            outbound_queue_events: 32,
            max_consecutive_protocol_errors: 3,
            upstream_close_grace_ms: 2000,
            client_close_grace_ms: 2000,
        }
    }
}

impl SessionConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_seconds)
    }

    pub fn inactivity_check_interval(&self) -> Duration {
        Duration::from_millis(self.inactivity_check_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn upstream_close_grace(&self) -> Duration {
        Duration::from_millis(self.upstream_close_grace_ms)
    }

    pub fn client_close_grace(&self) -> Duration {
        Duration::from_millis(self.client_close_grace_ms)
    }
}
