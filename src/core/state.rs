use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::auth::SessionAuthenticator;
use crate::config::{ServerConfig, SessionConfig};
use crate::core::audit::{AuditSink, FanoutAuditSink};
use crate::core::health::HealthMonitor;
use crate::core::rate_limiter::SlidingWindowRateLimiter;
use crate::core::registry::SessionRegistry;
use crate::core::upstream::{SpeechServiceConnector, UpstreamConnector};
use crate::errors::AuthResult;

/// Core-layer shared services
///
/// The rate limiter and the registry are the only state shared between
/// sessions. The connector, audit sink and health monitor are injected so that
/// tests can substitute them.
pub struct CoreState {
    pub session: SessionConfig,
    pub authenticator: SessionAuthenticator,
    pub rate_limiter: SlidingWindowRateLimiter,
    pub registry: SessionRegistry,
    pub audit: Arc<dyn AuditSink>,
    pub health: Arc<HealthMonitor>,
    pub connector: Arc<dyn UpstreamConnector>,
}

impl CoreState {
    /// Initialize core state with the configured speech service and audit sinks
    pub fn new(config: &ServerConfig) -> AuthResult<Arc<Self>> {
        let connector: Arc<dyn UpstreamConnector> =
            Arc::new(SpeechServiceConnector::new(config.upstream.clone()));
        let audit: Arc<dyn AuditSink> = Arc::new(FanoutAuditSink::from_config(&config.audit));
        Self::with_services(config, connector, audit)
    }

    /// Initialize core state around an explicit connector and audit sink
    pub fn with_services(
        config: &ServerConfig,
        connector: Arc<dyn UpstreamConnector>,
        audit: Arc<dyn AuditSink>,
    ) -> AuthResult<Arc<Self>> {
        let authenticator = SessionAuthenticator::from_config(&config.auth)?;
        let health = Arc::new(HealthMonitor::new(connector.clone(), config.health.clone()));

        info!(
            connector = connector.name(),
            max_sessions = config.rate_limit.max_sessions,
            window_seconds = config.rate_limit.window_seconds,
            "Initialized core state"
        );

        Ok(Arc::new(Self {
            session: config.session.clone(),
            authenticator,
            rate_limiter: SlidingWindowRateLimiter::from_config(&config.rate_limit),
            registry: SessionRegistry::new(),
            audit,
            health,
            connector,
        }))
    }

    /// Background upkeep: upstream health probes and rate-limiter cleanup
    pub fn spawn_maintenance(self: &Arc<Self>) -> Maintenance {
        let probes = self.health.spawn_probe_loop();

        let core = Arc::clone(self);
        let purge = tokio::spawn(async move {
            let period = core.rate_limiter.window().max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let removed = core.rate_limiter.purge_expired();
                if removed > 0 {
                    debug!(removed, "Purged idle rate limit windows");
                }
            }
        });

        Maintenance { probes, purge }
    }
}

/// Handles of the background tasks started by [`CoreState::spawn_maintenance`]
#[derive(Debug)]
pub struct Maintenance {
    probes: JoinHandle<()>,
    purge: JoinHandle<()>,
}

impl Maintenance {
    pub fn abort(&self) {
        self.probes.abort();
        self.purge.abort();
    }
}
