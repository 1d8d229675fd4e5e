//! Token validation settings
//!
//! The relay never issues tokens. It only needs the material to verify them:
//! either a shared HMAC secret or the path to the identity provider's public key.

use std::path::PathBuf;

/// Default claim that carries the tenant/organization identifier
pub const DEFAULT_TENANT_CLAIM: &str = "tenant_id";

/// Authentication configuration for the transcription socket
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 shared secret
    pub jwt_secret: Option<String>,
    /// PEM encoded RSA or EC public key (RS256 / ES256)
    pub jwt_public_key_path: Option<PathBuf>,
    /// Expected `iss` claim, unchecked when absent
    pub issuer: Option<String>,
    /// Expected `aud` claim, unchecked when absent
    pub audience: Option<String>,
    /// Claim name holding the tenant id
    pub tenant_claim: String,
    /// Clock skew tolerance applied to `exp`
    pub leeway_seconds: u64,
}

impl AuthConfig {
    /// Build a config that validates HS256 tokens signed with `secret`
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: Some(secret.into()),
            tenant_claim: DEFAULT_TENANT_CLAIM.to_string(),
            ..Default::default()
        }
    }

    /// Whether any verification key material is configured
    pub fn has_key_material(&self) -> bool {
        self.jwt_secret.is_some() || self.jwt_public_key_path.is_some()
    }
}
