use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::core::health::HealthProbe;

/// Connection state of one upstream transcription connection
///
/// Ordered: the state only ever moves to a later variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpstreamState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Partial,
    Final,
}

/// A transcription result produced by the speech service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionEvent {
    pub kind: TranscriptKind,
    pub text: String,
    pub language: Option<String>,
}

impl TranscriptionEvent {
    pub fn partial(text: impl Into<String>, language: Option<String>) -> Self {
        Self {
            kind: TranscriptKind::Partial,
            text: text.into(),
            language,
        }
    }

    pub fn final_result(text: impl Into<String>, language: Option<String>) -> Self {
        Self {
            kind: TranscriptKind::Final,
            text: text.into(),
            language,
        }
    }
}

/// Error types for upstream operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Speech service unreachable: {0}")]
    Unreachable(String),
    #[error("Speech service connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Speech service rejected the handshake: {0}")]
    HandshakeRejected(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Malformed response from speech service: {0}")]
    MalformedResponse(String),
    #[error("Speech service error: {0}")]
    Provider(String),
}

impl UpstreamError {
    /// Whether the error happened before the connection was usable
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unreachable(_)
                | UpstreamError::ConnectTimeout(_)
                | UpstreamError::HandshakeRejected(_)
        )
    }

    /// Generic code reported to the client; provider detail stays in the logs
    pub fn client_code(&self) -> &'static str {
        if self.is_connect_failure() {
            "upstream_unavailable"
        } else {
            "upstream_error"
        }
    }
}

/// What `receive` yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Transcript(TranscriptionEvent),
    /// The service ended the stream
    Closed,
    Error(UpstreamError),
}

impl UpstreamEvent {
    /// `Closed` and `Error` end the event stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UpstreamEvent::Transcript(_))
    }
}

/// Outcome of handing one audio chunk to the upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Sent,
    /// The write timeout elapsed; the chunk is handed back for retry or drop
    Backpressure(Bytes),
    Closed,
}

fn advance(state: &watch::Sender<UpstreamState>, next: UpstreamState) -> bool {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    })
}

/// Write half of an upstream connection
///
/// Cheap to clone; every clone shares the same connection task.
#[derive(Debug, Clone)]
pub struct UpstreamSender {
    audio_tx: mpsc::Sender<Bytes>,
    state: Arc<watch::Sender<UpstreamState>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    write_timeout: Duration,
}

impl UpstreamSender {
    pub fn state(&self) -> UpstreamState {
        *self.state.borrow()
    }

    /// Forward one audio chunk, waiting at most the write timeout for room
    pub async fn send_audio(&self, chunk: Bytes) -> SendResult {
        if self.state() >= UpstreamState::Closing {
            return SendResult::Closed;
        }

        match timeout(self.write_timeout, self.audio_tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(chunk);
                SendResult::Sent
            }
            Ok(Err(_)) => SendResult::Closed,
            Err(_) => SendResult::Backpressure(chunk),
        }
    }

    /// Ask the connection to finish; safe to call any number of times
    pub fn close(&self) {
        if advance(&self.state, UpstreamState::Closing) {
            tracing::debug!("Upstream close requested");
        }
    }

    /// Wait for the connection to reach `Closed`
    ///
    /// When the grace period elapses first the connection task is aborted and
    /// the state forced to `Closed`.
    pub async fn closed(&self, grace: Duration) -> UpstreamState {
        let mut rx = self.state.subscribe();
        let reached = matches!(
            timeout(grace, rx.wait_for(|s| *s == UpstreamState::Closed)).await,
            Ok(Ok(_))
        );

        if !reached {
            tracing::warn!("Upstream did not close within {:?}, aborting", grace);
            if let Some(task) = self.task.lock().take() {
                task.abort();
            }
            advance(&self.state, UpstreamState::Closed);
        }

        self.state()
    }
}

/// Read half of an upstream connection
#[derive(Debug)]
pub struct UpstreamReceiver {
    events_rx: mpsc::Receiver<UpstreamEvent>,
}

impl UpstreamReceiver {
    /// Next event in upstream order; a vanished connection reads as `Closed`
    pub async fn receive(&mut self) -> UpstreamEvent {
        self.events_rx.recv().await.unwrap_or(UpstreamEvent::Closed)
    }
}

/// Client side of one upstream transcription connection
#[derive(Debug)]
pub struct UpstreamClient {
    sender: UpstreamSender,
    receiver: UpstreamReceiver,
}

impl UpstreamClient {
    /// Create a client and the peer that drives it
    ///
    /// Connector implementations move the peer into their connection task; tests
    /// hold it directly to play the speech service.
    pub fn pair(
        write_timeout: Duration,
        audio_capacity: usize,
        event_capacity: usize,
    ) -> (UpstreamClient, UpstreamPeer) {
        let (audio_tx, audio_rx) = mpsc::channel(audio_capacity.max(1));
        let (events_tx, events_rx) = mpsc::channel(event_capacity.max(1));
        let state = Arc::new(watch::Sender::new(UpstreamState::Idle));

        let client = UpstreamClient {
            sender: UpstreamSender {
                audio_tx,
                state: state.clone(),
                task: Arc::new(Mutex::new(None)),
                write_timeout,
            },
            receiver: UpstreamReceiver { events_rx },
        };
        let peer = UpstreamPeer {
            audio_rx,
            events_tx,
            control: PeerControl { state },
        };
        (client, peer)
    }

    /// Tie the connection task to this client so `closed` can abort it
    pub fn attach_task(&self, task: JoinHandle<()>) {
        *self.sender.task.lock() = Some(task);
    }

    pub fn state(&self) -> UpstreamState {
        self.sender.state()
    }

    pub async fn send_audio(&self, chunk: Bytes) -> SendResult {
        self.sender.send_audio(chunk).await
    }

    pub async fn receive(&mut self) -> UpstreamEvent {
        self.receiver.receive().await
    }

    pub fn close(&self) {
        self.sender.close();
    }

    pub async fn closed(&self, grace: Duration) -> UpstreamState {
        self.sender.closed(grace).await
    }

    /// Split into independently owned halves
    pub fn split(self) -> (UpstreamSender, UpstreamReceiver) {
        (self.sender, self.receiver)
    }
}

/// State handle held by whoever drives the connection
///
/// Dropping it marks the connection `Closed`, so an aborted or finished
/// connection task can never leave the client waiting.
#[derive(Debug)]
pub struct PeerControl {
    state: Arc<watch::Sender<UpstreamState>>,
}

impl PeerControl {
    pub fn state(&self) -> UpstreamState {
        *self.state.borrow()
    }

    pub fn mark_connecting(&self) {
        advance(&self.state, UpstreamState::Connecting);
    }

    pub fn mark_open(&self) {
        advance(&self.state, UpstreamState::Open);
    }

    pub fn mark_closing(&self) {
        advance(&self.state, UpstreamState::Closing);
    }

    pub fn mark_closed(&self) {
        advance(&self.state, UpstreamState::Closed);
    }

    pub fn is_closing(&self) -> bool {
        self.state() >= UpstreamState::Closing
    }

    /// Resolves once the client asked the connection to close
    pub async fn closing_requested(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s >= UpstreamState::Closing).await;
    }
}

impl Drop for PeerControl {
    fn drop(&mut self) {
        advance(&self.state, UpstreamState::Closed);
    }
}

/// Connection-side endpoints of an [`UpstreamClient`]
#[derive(Debug)]
pub struct UpstreamPeer {
    /// Audio chunks in client order
    pub audio_rx: mpsc::Receiver<Bytes>,
    /// Events delivered to the client's `receive`
    pub events_tx: mpsc::Sender<UpstreamEvent>,
    pub control: PeerControl,
}

/// Opens upstream connections and probes upstream health
#[async_trait::async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a connection; returns once it is `Open`
    async fn connect(&self, language: Option<String>) -> Result<UpstreamClient, UpstreamError>;

    /// Lightweight reachability check, independent of any session
    async fn probe(&self) -> HealthProbe;

    fn name(&self) -> &'static str {
        "upstream"
    }
}
