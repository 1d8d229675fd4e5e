use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::ServerConfig;
use super::auth::{AuthConfig, DEFAULT_TENANT_CLAIM};
use super::session::{RateLimitConfig, SessionConfig};
use super::upstream::{AuditConfig, HealthConfig, UpstreamConfig};
use super::utils::parse_bool;
use super::yaml::YamlConfig;

/// Read and parse a numeric environment variable
///
/// Missing variables yield `Ok(None)`; present but unparsable ones are errors so a
/// typo in deployment config does not silently fall back to a default.
fn env_parsed<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} environment variable: {e}").into()),
        Err(_) => Ok(None),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, Box<dyn std::error::Error>> {
    match env::var(name) {
        Ok(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| format!("Invalid {name} environment variable: {raw}").into()),
        Err(_) => Ok(None),
    }
}

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
///
/// # Arguments
/// * `yaml_config` - Optional YAML configuration; `None` means environment only
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();

    // Helper macro for string values: YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            $yaml_value
                .or_else(|| env::var($env_var).ok())
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // Helper macro for optional string values: YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            $yaml_value.or_else(|| env::var($env_var).ok())
        };
    }

    // Helper macro for parsed values: YAML > ENV > Default
    macro_rules! get_parsed {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            match $yaml_value {
                Some(value) => value,
                None => env_parsed($env_var)?.unwrap_or($default),
            }
        };
    }

    macro_rules! get_bool {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            match $yaml_value {
                Some(value) => value,
                None => env_bool($env_var)?.unwrap_or($default),
            }
        };
    }

    // Server configuration
    let server = yaml.server.unwrap_or_default();
    let host = get_value!("HOST", server.host, "0.0.0.0");
    let port = get_parsed!("PORT", server.port, 3001u16);

    // Authentication
    let auth_yaml = yaml.auth.unwrap_or_default();
    let auth = AuthConfig {
        jwt_secret: get_optional!("AUTH_JWT_SECRET", auth_yaml.jwt_secret),
        jwt_public_key_path: get_optional!(
            "AUTH_JWT_PUBLIC_KEY_PATH",
            auth_yaml.jwt_public_key_path
        )
        .map(PathBuf::from),
        issuer: get_optional!("AUTH_JWT_ISSUER", auth_yaml.issuer),
        audience: get_optional!("AUTH_JWT_AUDIENCE", auth_yaml.audience),
        tenant_claim: get_value!(
            "AUTH_TENANT_CLAIM",
            auth_yaml.tenant_claim,
            DEFAULT_TENANT_CLAIM
        ),
        leeway_seconds: get_parsed!("AUTH_LEEWAY_SECONDS", auth_yaml.leeway_seconds, 0),
    };

    // Admission limits
    let rate_yaml = yaml.rate_limit.unwrap_or_default();
    let rate_defaults = RateLimitConfig::default();
    let rate_limit = RateLimitConfig {
        max_sessions: get_parsed!(
            "RATE_LIMIT_MAX_SESSIONS",
            rate_yaml.max_sessions,
            rate_defaults.max_sessions
        ),
        window_seconds: get_parsed!(
            "RATE_LIMIT_WINDOW_SECONDS",
            rate_yaml.window_seconds,
            rate_defaults.window_seconds
        ),
    };

    // Session limits
    let session_yaml = yaml.session.unwrap_or_default();
    let d = SessionConfig::default();
    let session = SessionConfig {
        inactivity_timeout_seconds: get_parsed!(
            "SESSION_INACTIVITY_TIMEOUT_SECONDS",
            session_yaml.inactivity_timeout_seconds,
            d.inactivity_timeout_seconds
        ),
        inactivity_check_interval_ms: get_parsed!(
            "SESSION_INACTIVITY_CHECK_INTERVAL_MS",
            session_yaml.inactivity_check_interval_ms,
            d.inactivity_check_interval_ms
        ),
        connect_timeout_seconds: get_parsed!(
            "SESSION_CONNECT_TIMEOUT_SECONDS",
            session_yaml.connect_timeout_seconds,
            d.connect_timeout_seconds
        ),
        pre_stream_buffer_chunks: get_parsed!(
            "SESSION_PRE_STREAM_BUFFER_CHUNKS",
            session_yaml.pre_stream_buffer_chunks,
            d.pre_stream_buffer_chunks
        ),
        audio_queue_chunks: get_parsed!(
            "SESSION_AUDIO_QUEUE_CHUNKS",
            session_yaml.audio_queue_chunks,
            d.audio_queue_chunks
        ),
        outbound_queue_events: get_parsed!(
            "SESSION_OUTBOUND_QUEUE_EVENTS",
            session_yaml.outbound_queue_events,
            d.outbound_queue_events
        ),
        max_consecutive_protocol_errors: get_parsed!(
            "SESSION_MAX_PROTOCOL_ERRORS",
            session_yaml.max_consecutive_protocol_errors,
            d.max_consecutive_protocol_errors
        ),
        upstream_close_grace_ms: get_parsed!(
            "SESSION_UPSTREAM_CLOSE_GRACE_MS",
            session_yaml.upstream_close_grace_ms,
            d.upstream_close_grace_ms
        ),
        client_close_grace_ms: get_parsed!(
            "SESSION_CLIENT_CLOSE_GRACE_MS",
            session_yaml.client_close_grace_ms,
            d.client_close_grace_ms
        ),
    };

    // Speech service
    let up = yaml.upstream.unwrap_or_default();
    let ud = UpstreamConfig::default();
    let upstream = UpstreamConfig {
        url: get_value!("UPSTREAM_URL", up.url, ud.url),
        // DEEPGRAM_API_KEY is accepted for compatibility with existing deployments
        api_key: get_optional!("UPSTREAM_API_KEY", up.api_key)
            .or_else(|| env::var("DEEPGRAM_API_KEY").ok()),
        model: get_value!("UPSTREAM_MODEL", up.model, ud.model),
        encoding: get_value!("UPSTREAM_ENCODING", up.encoding, ud.encoding),
        sample_rate: get_parsed!("UPSTREAM_SAMPLE_RATE", up.sample_rate, ud.sample_rate),
        channels: get_parsed!("UPSTREAM_CHANNELS", up.channels, ud.channels),
        interim_results: get_bool!(
            "UPSTREAM_INTERIM_RESULTS",
            up.interim_results,
            ud.interim_results
        ),
        punctuate: get_bool!("UPSTREAM_PUNCTUATE", up.punctuate, ud.punctuate),
        write_timeout_ms: get_parsed!(
            "UPSTREAM_WRITE_TIMEOUT_MS",
            up.write_timeout_ms,
            ud.write_timeout_ms
        ),
        keepalive_interval_seconds: get_parsed!(
            "UPSTREAM_KEEPALIVE_INTERVAL_SECONDS",
            up.keepalive_interval_seconds,
            ud.keepalive_interval_seconds
        ),
        drain_timeout_ms: get_parsed!(
            "UPSTREAM_DRAIN_TIMEOUT_MS",
            up.drain_timeout_ms,
            ud.drain_timeout_ms
        ),
        health_url: get_value!("UPSTREAM_HEALTH_URL", up.health_url, ud.health_url),
        probe_timeout_seconds: get_parsed!(
            "UPSTREAM_PROBE_TIMEOUT_SECONDS",
            up.probe_timeout_seconds,
            ud.probe_timeout_seconds
        ),
    };

    // Health monitor
    let health_yaml = yaml.health.unwrap_or_default();
    let hd = HealthConfig::default();
    let health = HealthConfig {
        probe_interval_seconds: get_parsed!(
            "HEALTH_PROBE_INTERVAL_SECONDS",
            health_yaml.probe_interval_seconds,
            hd.probe_interval_seconds
        ),
        cache_ttl_seconds: get_parsed!(
            "HEALTH_CACHE_TTL_SECONDS",
            health_yaml.cache_ttl_seconds,
            hd.cache_ttl_seconds
        ),
        fail_fast_window_seconds: get_parsed!(
            "HEALTH_FAIL_FAST_WINDOW_SECONDS",
            health_yaml.fail_fast_window_seconds,
            hd.fail_fast_window_seconds
        ),
    };

    // Audit sink
    let audit_yaml = yaml.audit.unwrap_or_default();
    let audit = AuditConfig {
        webhook_url: get_optional!("AUDIT_WEBHOOK_URL", audit_yaml.webhook_url),
        webhook_timeout_seconds: get_parsed!(
            "AUDIT_WEBHOOK_TIMEOUT_SECONDS",
            audit_yaml.webhook_timeout_seconds,
            AuditConfig::default().webhook_timeout_seconds
        ),
    };

    Ok(ServerConfig {
        host,
        port,
        auth,
        rate_limit,
        session,
        upstream,
        health,
        audit,
    })
}
