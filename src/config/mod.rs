//! Configuration module for the voice relay
//!
//! This module handles server configuration from two sources: YAML files and
//! environment variables. When a YAML file is given its values win over the
//! environment, and built-in defaults fill whatever neither source sets.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//! - `auth`, `session`, `upstream`: typed sections of [`ServerConfig`]
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod auth;
mod env;
mod merge;
mod session;
mod upstream;
mod utils;
mod validation;
mod yaml;

pub use auth::{AuthConfig, DEFAULT_TENANT_CLAIM};
pub use session::{RateLimitConfig, SessionConfig};
pub use upstream::{
    AuditConfig, DEFAULT_UPSTREAM_HEALTH_URL, DEFAULT_UPSTREAM_URL, HealthConfig, UpstreamConfig,
};

/// Server configuration
///
/// Contains all configuration needed to run the relay:
/// - Listener settings (host, port)
/// - Token validation material
/// - Admission limits
/// - Session timeouts and queue bounds
/// - Speech service connection and health probing
/// - Audit sink
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub upstream: UpstreamConfig,
    pub health: HealthConfig,
    pub audit: AuditConfig,
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable fallbacks
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables
    /// 3. Default values
    ///
    /// The `.env` file is not read here; only real environment variables
    /// participate when an explicit config file was requested.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configuration for tests and embedding: defaults plus an HS256 secret
    pub fn with_jwt_secret(secret: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            auth: AuthConfig::with_secret(secret),
            rate_limit: RateLimitConfig::default(),
            session: SessionConfig::default(),
            upstream: UpstreamConfig::default(),
            health: HealthConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}
