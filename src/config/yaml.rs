use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Anything missing
/// falls back to the environment and then to built-in defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///
/// auth:
///   jwt_secret: "shared-secret"
///   issuer: "https://id.example.com"
///   audience: "voice"
///   tenant_claim: "org_id"
///
/// rate_limit:
///   max_sessions: 10
///   window_seconds: 60
///
/// session:
///   inactivity_timeout_seconds: 30
///   connect_timeout_seconds: 5
///   audio_queue_chunks: 32
///
/// upstream:
///   url: "wss://api.deepgram.com/v1/listen"
///   api_key: "your-key"
///   model: "nova-2"
///
/// health:
///   probe_interval_seconds: 15
///
/// audit:
///   webhook_url: "https://audit.example.com/voice"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub auth: Option<AuthYaml>,
    pub rate_limit: Option<RateLimitYaml>,
    pub session: Option<SessionYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub health: Option<HealthYaml>,
    pub audit: Option<AuditYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Token validation settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub jwt_secret: Option<String>,
    pub jwt_public_key_path: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub tenant_claim: Option<String>,
    pub leeway_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitYaml {
    pub max_sessions: Option<u32>,
    pub window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub inactivity_timeout_seconds: Option<u64>,
    pub inactivity_check_interval_ms: Option<u64>,
    pub connect_timeout_seconds: Option<u64>,
    pub pre_stream_buffer_chunks: Option<usize>,
    pub audio_queue_chunks: Option<usize>,
    pub outbound_queue_events: Option<usize>,
    pub max_consecutive_protocol_errors: Option<u32>,
    pub upstream_close_grace_ms: Option<u64>,
    pub client_close_grace_ms: Option<u64>,
}

/// Speech service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub interim_results: Option<bool>,
    pub punctuate: Option<bool>,
    pub write_timeout_ms: Option<u64>,
    pub keepalive_interval_seconds: Option<u64>,
    pub drain_timeout_ms: Option<u64>,
    pub health_url: Option<String>,
    pub probe_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HealthYaml {
    pub probe_interval_seconds: Option<u64>,
    pub cache_ttl_seconds: Option<u64>,
    pub fail_fast_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuditYaml {
    pub webhook_url: Option<String>,
    pub webhook_timeout_seconds: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
