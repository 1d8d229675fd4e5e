use jsonwebtoken::errors::{Error as JwtError, ErrorKind};

/// WebSocket close code sent for every authentication failure
pub const UNAUTHENTICATED_CLOSE_CODE: u16 = 4001;

/// Error codes used in logs and audit events
pub mod error_codes {
    pub const MISSING_TOKEN: &str = "missing_token";
    pub const MALFORMED_TOKEN: &str = "malformed_token";
    pub const EXPIRED_TOKEN: &str = "expired_token";
    pub const INVALID_TOKEN: &str = "invalid_token";
    pub const MISSING_CLAIM: &str = "missing_claim";
    pub const CONFIG_ERROR: &str = "config_error";
}

/// Authentication error types
///
/// The variants exist for logging only. Clients see the same close code for
/// every one of them.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `token` query parameter on the upgrade request
    #[error("Missing access token")]
    MissingToken,

    /// Token is not a decodable JWT
    #[error("Malformed access token: {0}")]
    MalformedToken(String),

    /// Token `exp` is in the past
    #[error("Access token expired")]
    ExpiredToken,

    /// Signature, issuer, audience or algorithm did not check out
    #[error("Invalid access token: {0}")]
    InvalidToken(String),

    /// A required identity claim is absent or empty
    #[error("Access token is missing the '{0}' claim")]
    MissingClaim(String),

    /// Verification key could not be loaded
    #[error("Auth configuration error: {0}")]
    ConfigError(String),
}

impl AuthError {
    /// Get the error code for logs and audit events
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => error_codes::MISSING_TOKEN,
            AuthError::MalformedToken(_) => error_codes::MALFORMED_TOKEN,
            AuthError::ExpiredToken => error_codes::EXPIRED_TOKEN,
            AuthError::InvalidToken(_) => error_codes::INVALID_TOKEN,
            AuthError::MissingClaim(_) => error_codes::MISSING_CLAIM,
            AuthError::ConfigError(_) => error_codes::CONFIG_ERROR,
        }
    }

    /// The close code the client receives
    pub fn close_code(&self) -> u16 {
        UNAUTHENTICATED_CLOSE_CODE
    }

    /// Log the error at the appropriate level
    pub fn log(&self) {
        match self {
            // Debug level for expected client mistakes
            AuthError::MissingToken | AuthError::ExpiredToken => {
                tracing::debug!(code = self.error_code(), "{}", self);
            }
            // Warn level for tokens that look tampered or come from the wrong issuer
            AuthError::MalformedToken(_)
            | AuthError::InvalidToken(_)
            | AuthError::MissingClaim(_) => {
                tracing::warn!(code = self.error_code(), "{}", self);
            }
            // Error level for system issues
            AuthError::ConfigError(msg) => {
                tracing::error!("Auth configuration error: {}", msg);
            }
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => AuthError::MalformedToken(err.to_string()),
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            ErrorKind::InvalidKeyFormat | ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey => {
                AuthError::ConfigError(err.to_string())
            }
            _ => AuthError::InvalidToken(err.to_string()),
        }
    }
}

// Result type alias for convenience
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthError::MissingToken.error_code(), error_codes::MISSING_TOKEN);
        assert_eq!(AuthError::ExpiredToken.error_code(), error_codes::EXPIRED_TOKEN);
        assert_eq!(
            AuthError::MissingClaim("sub".to_string()).error_code(),
            error_codes::MISSING_CLAIM
        );
    }

    #[test]
    fn test_every_variant_closes_with_4001() {
        let errors = [
            AuthError::MissingToken,
            AuthError::MalformedToken("x".to_string()),
            AuthError::ExpiredToken,
            AuthError::InvalidToken("x".to_string()),
            AuthError::MissingClaim("tenant_id".to_string()),
            AuthError::ConfigError("x".to_string()),
        ];
        for err in errors {
            assert_eq!(err.close_code(), 4001, "{err}");
        }
    }

    #[test]
    fn test_from_jwt_error_kinds() {
        let expired: AuthError = JwtError::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(expired, AuthError::ExpiredToken));

        let malformed: AuthError = JwtError::from(ErrorKind::InvalidToken).into();
        assert!(matches!(malformed, AuthError::MalformedToken(_)));

        let bad_sig: AuthError = JwtError::from(ErrorKind::InvalidSignature).into();
        assert!(matches!(bad_sig, AuthError::InvalidToken(_)));

        let bad_issuer: AuthError = JwtError::from(ErrorKind::InvalidIssuer).into();
        assert!(matches!(bad_issuer, AuthError::InvalidToken(_)));

        let missing: AuthError =
            JwtError::from(ErrorKind::MissingRequiredClaim("exp".to_string())).into();
        assert!(matches!(missing, AuthError::MissingClaim(ref c) if c == "exp"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::MissingToken.to_string(), "Missing access token");
        assert_eq!(
            AuthError::MissingClaim("tenant_id".to_string()).to_string(),
            "Access token is missing the 'tenant_id' claim"
        );
    }
}
