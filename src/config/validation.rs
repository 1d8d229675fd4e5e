use url::Url;

use super::ServerConfig;
use super::auth::AuthConfig;
use super::session::{RateLimitConfig, SessionConfig};
use super::upstream::{AuditConfig, UpstreamConfig};

/// Run every validation over a fully merged configuration
pub fn validate(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    validate_auth(&config.auth)?;
    validate_rate_limit(&config.rate_limit)?;
    validate_session(&config.session)?;
    validate_upstream(&config.upstream)?;
    validate_audit(&config.audit)?;
    Ok(())
}

/// Validate token verification material
///
/// Exactly one of the shared secret or the public key path must be configured,
/// and the key file must exist.
pub fn validate_auth(auth: &AuthConfig) -> Result<(), Box<dyn std::error::Error>> {
    match (&auth.jwt_secret, &auth.jwt_public_key_path) {
        (None, None) => {
            return Err(
                "Either AUTH_JWT_SECRET or AUTH_JWT_PUBLIC_KEY_PATH must be configured".into(),
            );
        }
        (Some(_), Some(_)) => {
            return Err(
                "AUTH_JWT_SECRET and AUTH_JWT_PUBLIC_KEY_PATH are mutually exclusive".into(),
            );
        }
        (Some(secret), None) if secret.trim().is_empty() => {
            return Err("AUTH_JWT_SECRET cannot be empty".into());
        }
        (None, Some(path)) if !path.exists() => {
            return Err(format!(
                "AUTH_JWT_PUBLIC_KEY_PATH file does not exist: {}",
                path.display()
            )
            .into());
        }
        _ => {}
    }

    if auth.tenant_claim.trim().is_empty() {
        return Err("AUTH_TENANT_CLAIM cannot be empty".into());
    }

    Ok(())
}

pub fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), Box<dyn std::error::Error>> {
    if rate_limit.max_sessions == 0 {
        return Err("RATE_LIMIT_MAX_SESSIONS must be greater than zero".into());
    }
    if rate_limit.window_seconds == 0 {
        return Err("RATE_LIMIT_WINDOW_SECONDS must be greater than zero".into());
    }
    Ok(())
}

/// Validate session timeouts and queue bounds
///
/// Zero-capacity queues would make every session fail on its first chunk, and a
/// zero timeout would close sessions immediately.
pub fn validate_session(session: &SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let positive = [
        ("inactivity_timeout_seconds", session.inactivity_timeout_seconds),
        ("inactivity_check_interval_ms", session.inactivity_check_interval_ms),
        ("connect_timeout_seconds", session.connect_timeout_seconds),
        ("pre_stream_buffer_chunks", session.pre_stream_buffer_chunks as u64),
        ("audio_queue_chunks", session.audio_queue_chunks as u64),
        ("outbound_queue_events", session.outbound_queue_events as u64),
        (
            "max_consecutive_protocol_errors",
            session.max_consecutive_protocol_errors as u64,
        ),
    ];

    for (name, value) in positive {
        if value == 0 {
            return Err(format!("session.{name} must be greater than zero").into());
        }
    }

    Ok(())
}

/// Validate the speech service endpoint
pub fn validate_upstream(upstream: &UpstreamConfig) -> Result<(), Box<dyn std::error::Error>> {
    let url = Url::parse(&upstream.url)
        .map_err(|e| format!("Invalid UPSTREAM_URL '{}': {e}", upstream.url))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(format!(
            "UPSTREAM_URL must use ws:// or wss://, got '{}'",
            url.scheme()
        )
        .into());
    }

    Url::parse(&upstream.health_url)
        .map_err(|e| format!("Invalid UPSTREAM_HEALTH_URL '{}': {e}", upstream.health_url))?;

    if upstream.write_timeout_ms == 0 {
        return Err("UPSTREAM_WRITE_TIMEOUT_MS must be greater than zero".into());
    }
    if upstream.sample_rate == 0 || upstream.channels == 0 {
        return Err("UPSTREAM_SAMPLE_RATE and UPSTREAM_CHANNELS must be greater than zero".into());
    }

    Ok(())
}

/// Validate the audit webhook, when one is configured
pub fn validate_audit(audit: &AuditConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(webhook_url) = &audit.webhook_url {
        let url = Url::parse(webhook_url)
            .map_err(|e| format!("Invalid AUDIT_WEBHOOK_URL '{webhook_url}': {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("AUDIT_WEBHOOK_URL must use http:// or https://".into());
        }
    }
    Ok(())
}
