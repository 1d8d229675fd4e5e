use crate::auth::context::Identity;
use crate::config::AuthConfig;
use crate::errors::auth_error::{AuthError, AuthResult};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Claims read from an access token
///
/// `exp` is checked by `jsonwebtoken` itself and `sub` is required through the
/// validation settings. `exp` is kept so a live session can end when the
/// token does. Everything else lands in `extra` so the tenant claim
/// name can be configured.
#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,
    exp: u64,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Load a PEM public key and detect its algorithm
///
/// RSA keys verify RS256 tokens, EC keys verify ES256 tokens.
pub fn load_public_key(key_path: &Path) -> AuthResult<(DecodingKey, Algorithm)> {
    let key_data = fs::read(key_path)
        .map_err(|e| AuthError::ConfigError(format!("Failed to read public key file: {e}")))?;

    if let Ok(key) = DecodingKey::from_rsa_pem(&key_data) {
        Ok((key, Algorithm::RS256))
    } else if let Ok(key) = DecodingKey::from_ec_pem(&key_data) {
        Ok((key, Algorithm::ES256))
    } else {
        Err(AuthError::ConfigError(
            "Unsupported key format. Only RSA and ECDSA PEM public keys are supported.".to_string(),
        ))
    }
}

/// Validates access tokens presented on the transcription socket
///
/// Stateless and cheap to share: one instance lives in the core state and is
/// consulted before any session resource is allocated.
pub struct SessionAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    tenant_claim: String,
}

impl std::fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthenticator")
            .field("algorithms", &self.validation.algorithms)
            .field("tenant_claim", &self.tenant_claim)
            .finish_non_exhaustive()
    }
}

impl SessionAuthenticator {
    /// Build an authenticator from configuration
    ///
    /// # Errors
    /// Returns `AuthError::ConfigError` when no key material is configured or
    /// the public key cannot be read.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let (decoding_key, algorithm) = match (&config.jwt_secret, &config.jwt_public_key_path) {
            (Some(secret), _) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
            (None, Some(path)) => load_public_key(path)?,
            (None, None) => {
                return Err(AuthError::ConfigError(
                    "no JWT secret or public key configured".to_string(),
                ));
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_seconds;
        validation.set_required_spec_claims(&["exp", "sub"]);

        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            decoding_key,
            validation,
            tenant_claim: config.tenant_claim.clone(),
        })
    }

    /// HS256 authenticator with default claim settings
    pub fn from_secret(secret: &str) -> AuthResult<Self> {
        Self::from_config(&AuthConfig::with_secret(secret))
    }

    /// Validate a token and extract the caller identity
    ///
    /// # Errors
    /// Every failure is returned as a typed `AuthError`; callers close the socket
    /// with the same code regardless of the variant.
    pub fn authenticate(&self, token: Option<&str>) -> AuthResult<Identity> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::MissingClaim("sub".to_string()));
        }

        let tenant_id = match claims.extra.get(&self.tenant_claim) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(AuthError::MissingClaim(self.tenant_claim.clone())),
        };

        // The handshake leeway also applies to the live session
        let expires_at = claims.exp.saturating_add(self.validation.leeway);
        Ok(Identity::new(claims.sub, tenant_id).with_expiry(expires_at))
    }
}
