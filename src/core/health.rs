//! Upstream health tracking
//!
//! The monitor combines two sources: periodic probes through the connector and
//! the outcome of real session connects. The latest observation backs the
//! `/voice/health` endpoint and the fail-fast check new sessions run before
//! dialing the speech service.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::HealthConfig;
use crate::core::upstream::UpstreamConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamStatus {
    Healthy,
    Unhealthy,
}

/// Result of one health observation, also the `/voice/health` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthProbe {
    pub upstream_status: UpstreamStatus,
    /// Round trip of the probe, absent when the service could not be reached
    pub latency_ms: Option<u64>,
}

impl HealthProbe {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            upstream_status: UpstreamStatus::Healthy,
            latency_ms: Some(latency.as_millis() as u64),
        }
    }

    pub fn unhealthy(latency: Option<Duration>) -> Self {
        Self {
            upstream_status: UpstreamStatus::Unhealthy,
            latency_ms: latency.map(|l| l.as_millis() as u64),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.upstream_status == UpstreamStatus::Healthy
    }
}

#[derive(Debug, Clone)]
struct Observation {
    probe: HealthProbe,
    at: Instant,
}

pub struct HealthMonitor {
    connector: Arc<dyn UpstreamConnector>,
    config: HealthConfig,
    last: RwLock<Option<Observation>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("connector", &self.connector.name())
            .field("config", &self.config)
            .field("last", &*self.last.read())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(connector: Arc<dyn UpstreamConnector>, config: HealthConfig) -> Self {
        Self {
            connector,
            config,
            last: RwLock::new(None),
        }
    }

    fn record(&self, probe: HealthProbe) {
        let previous = self
            .last
            .write()
            .replace(Observation {
                probe: probe.clone(),
                at: Instant::now(),
            })
            .map(|obs| obs.probe.upstream_status);

        if previous != Some(probe.upstream_status) {
            match probe.upstream_status {
                UpstreamStatus::Healthy => info!(latency_ms = ?probe.latency_ms, "Upstream healthy"),
                UpstreamStatus::Unhealthy => warn!("Upstream unhealthy"),
            }
        }
    }

    /// Probe the connector now and store the result
    pub async fn probe_now(&self) -> HealthProbe {
        let probe = self.connector.probe().await;
        debug!(?probe, "Upstream probe finished");
        self.record(probe.clone());
        probe
    }

    /// Latest observation if younger than the cache TTL, otherwise a fresh probe
    pub async fn current(&self) -> HealthProbe {
        let cached = self
            .last
            .read()
            .as_ref()
            .filter(|obs| obs.at.elapsed() < self.config.cache_ttl())
            .map(|obs| obs.probe.clone());

        match cached {
            Some(probe) => probe,
            None => self.probe_now().await,
        }
    }

    /// Latest observation without probing
    pub fn last_observation(&self) -> Option<HealthProbe> {
        self.last.read().as_ref().map(|obs| obs.probe.clone())
    }

    pub fn record_connect_success(&self, latency: Duration) {
        self.record(HealthProbe::healthy(latency));
    }

    pub fn record_connect_failure(&self) {
        self.record(HealthProbe::unhealthy(None));
    }

    /// True while the latest observation is unhealthy and recent
    ///
    /// New sessions skip the connect attempt during this window and fail with
    /// `upstream_unavailable` straight away.
    pub fn should_fail_fast(&self) -> bool {
        self.last.read().as_ref().is_some_and(|obs| {
            !obs.probe.is_healthy() && obs.at.elapsed() < self.config.fail_fast_window()
        })
    }

    /// Probe on a fixed interval until the task is aborted
    pub fn spawn_probe_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.probe_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.probe_now().await;
            }
        })
    }
}
