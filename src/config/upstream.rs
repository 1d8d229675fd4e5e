//! Speech service, health probe and audit sink settings

use std::time::Duration;

pub const DEFAULT_UPSTREAM_URL: &str = "wss://api.deepgram.com/v1/listen";
pub const DEFAULT_UPSTREAM_HEALTH_URL: &str = "https://api.deepgram.com/v1/projects";

/// Connection settings for the streaming speech recognition service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Streaming endpoint (ws:// or wss://)
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub interim_results: bool,
    pub punctuate: bool,
    /// Bound on a single audio hand-off before backpressure is reported
    pub write_timeout_ms: u64,
    /// Interval between keep-alive frames while no audio flows
    pub keepalive_interval_seconds: u64,
    /// How long to wait for trailing results after asking the service to finish
    pub drain_timeout_ms: u64,
    /// HTTP endpoint used by the health probe
    pub health_url: String,
    pub probe_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: None,
            model: "nova-2".to_string(),
            encoding: "linear16".to_string(),
            sample_rate: 16000,
            channels: 1,
            interim_results: true,
            punctuate: true,
            write_timeout_ms: 200,
            keepalive_interval_seconds: 5,
            drain_timeout_ms: 1500,
            health_url: DEFAULT_UPSTREAM_HEALTH_URL.to_string(),
            probe_timeout_seconds: 3,
        }
    }
}

impl UpstreamConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

/// Upstream health monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Background probe period
    pub probe_interval_seconds: u64,
    /// Age after which `/voice/health` re-probes instead of serving the cached value
    pub cache_ttl_seconds: u64,
    /// After a failed probe or connect, new sessions fail immediately for this long
    pub fail_fast_window_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_seconds: 15,
            cache_ttl_seconds: 5,
            fail_fast_window_seconds: 5,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn fail_fast_window(&self) -> Duration {
        Duration::from_secs(self.fail_fast_window_seconds)
    }
}

/// External audit sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// When set, every audit event is also POSTed here as JSON
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_seconds: 5,
        }
    }
}

impl AuditConfig {
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_seconds)
    }
}
