//! Per-session audit trail
//!
//! The relay does not store audit data. Each session produces exactly one
//! [`SessionAuditRecord`] at teardown and hands it to an [`AuditSink`]; the
//! default sink writes a structured log line under the `audit` target and an
//! optional webhook sink forwards the same JSON to an external collector.
//! Session start and intermediate errors are ordinary `tracing` events.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AuditConfig;
use crate::core::session::TerminationReason;

/// Current wall-clock time in Unix milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Final record written once per session at teardown
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename = "session_ended")]
pub struct SessionAuditRecord {
    pub session_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub started_at: u64,
    pub ended_at: u64,
    pub termination_reason: TerminationReason,
    pub bytes_in: u64,
    pub events_out: u64,
    /// Audio chunks evicted from a full queue
    pub dropped_chunks: u64,
    /// Error code reported to the client when an error ended the session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Destination for session audit records
///
/// `emit` must not block: the coordinator calls it from its event loop.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: SessionAuditRecord);
}

/// Writes every record as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: SessionAuditRecord) {
        match serde_json::to_string(&record) {
            Ok(payload) => info!(
                target: "audit",
                session_id = %record.session_id,
                reason = %record.termination_reason,
                %payload,
                "audit"
            ),
            Err(e) => warn!(target: "audit", "Failed to serialize audit record: {}", e),
        }
    }
}

/// POSTs each record as JSON to an external collector
///
/// Delivery is fire-and-forget on a spawned task; failures are logged and
/// never reach the session.
#[derive(Debug, Clone)]
pub struct WebhookAuditSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookAuditSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }

    async fn deliver(
        client: reqwest::Client,
        url: String,
        timeout: Duration,
        record: SessionAuditRecord,
    ) -> Result<(), String> {
        let start = Instant::now();
        let response = client
            .post(&url)
            .json(&record)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                session_id = %record.session_id,
                status = %status,
                duration_ms = start.elapsed().as_millis(),
                "Delivered audit record"
            );
            Ok(())
        } else {
            Err(format!("collector responded with {status}"))
        }
    }
}

impl AuditSink for WebhookAuditSink {
    fn emit(&self, record: SessionAuditRecord) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(target: "audit", "No runtime available, dropping audit webhook delivery");
            return;
        };

        let client = self.client.clone();
        let url = self.url.clone();
        let timeout = self.timeout;
        handle.spawn(async move {
            let session_id = record.session_id.clone();
            if let Err(e) = Self::deliver(client, url.clone(), timeout, record).await {
                warn!(
                    target: "audit",
                    %session_id,
                    hook_url = %url,
                    "Audit webhook delivery failed: {}",
                    e
                );
            }
        });
    }
}

/// Forwards every record to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    /// Tracing sink always, webhook sink when configured
    pub fn from_config(config: &AuditConfig) -> Self {
        let mut sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(TracingAuditSink)];
        if let Some(url) = &config.webhook_url {
            sinks.push(Arc::new(WebhookAuditSink::new(
                url.clone(),
                config.webhook_timeout(),
            )));
        }
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for FanoutAuditSink {
    fn emit(&self, record: SessionAuditRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(record.clone());
            }
            last.emit(record);
        }
    }
}

/// Keeps records in memory; used by tests and local tooling
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<SessionAuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionAuditRecord> {
        self.records.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, record: SessionAuditRecord) {
        self.records.lock().push(record);
    }
}
