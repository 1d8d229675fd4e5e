use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::CoreState;
use crate::errors::AuthResult;

/// Application state that can be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    /// Core layer state: authenticator, rate limiter, registry and upstream services
    pub core_state: Arc<CoreState>,
}

impl AppState {
    /// Build the state with the configured speech service and audit sinks
    pub fn new(config: ServerConfig) -> AuthResult<Arc<Self>> {
        let core_state = CoreState::new(&config)?;
        Ok(Self::from_core(config, core_state))
    }

    /// Wrap an already built core, used when services are substituted
    pub fn from_core(config: ServerConfig, core_state: Arc<CoreState>) -> Arc<Self> {
        Arc::new(Self { config, core_state })
    }

    /// Ask every live session to close; returns how many were signalled
    pub fn shutdown_sessions(&self) -> usize {
        self.core_state.registry.shutdown_all()
    }
}
