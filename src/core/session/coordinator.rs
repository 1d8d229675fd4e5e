//! Session coordinator
//!
//! One coordinator task per session owns every piece of mutable session state.
//! Two reader tasks feed it through a bounded channel: one pulls frames off the
//! client socket, the other pulls events from the upstream connection. The
//! coordinator writes to the client through a [`ClientLink`] and to the
//! upstream through an [`UpstreamSender`], and it is the only place that
//! decides a session is over. The upstream connect runs as one more branch of
//! the coordinator loop, so client input, shutdown and token expiry are still
//! observed while it is in flight.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until, timeout};
use tracing::{debug, error, info, warn};

use super::buffer::AudioQueue;
use super::link::{ClientLink, DeliveryError};
use super::protocol::{ClientFrame, ControlMessage, OutgoingMessage, ProtocolError, error_codes};
use super::Session;
use super::state::SessionState;
use super::termination::{TerminationReason, close_codes};
use crate::auth::Identity;
use crate::core::audit::unix_millis;
use crate::core::registry::SessionEntry;
use crate::core::state::CoreState;
use crate::core::upstream::{
    SendResult, UpstreamClient, UpstreamError, UpstreamEvent, UpstreamReceiver, UpstreamSender,
};
use crate::errors::AuthError;

/// Capacity of the channel the reader tasks feed
const INPUT_CHANNEL_CAPACITY: usize = 64;

/// Why a connection was refused before a session existed
#[derive(Debug, thiserror::Error)]
pub enum ConnectRejection {
    #[error("authentication failed: {0}")]
    Unauthenticated(#[from] AuthError),
    #[error("session start rate limit exceeded")]
    RateLimited,
}

impl ConnectRejection {
    pub fn close_code(&self) -> u16 {
        match self {
            ConnectRejection::Unauthenticated(_) => close_codes::UNAUTHENTICATED,
            ConnectRejection::RateLimited => close_codes::RATE_LIMITED,
        }
    }

    /// Close frame reason; carries no authentication detail
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectRejection::Unauthenticated(_) => "unauthenticated",
            ConnectRejection::RateLimited => "rate_limited",
        }
    }
}

/// In-flight upstream connect, resolving to its outcome and duration
type ConnectAttempt = BoxFuture<'static, (Result<UpstreamClient, UpstreamError>, Duration)>;

#[derive(Debug)]
enum SessionInput {
    Client(ClientFrame),
    Upstream(UpstreamEvent),
}

/// Owner of one client/upstream pairing
pub struct SessionCoordinator {
    core: Arc<CoreState>,
    session: Session,
    shutdown: Arc<Notify>,
    link: Option<ClientLink>,
    upstream: Option<UpstreamSender>,
    connecting: Option<ConnectAttempt>,
    /// When the access token stops being valid
    auth_deadline: Option<Instant>,
    /// Audio waiting for the upstream, pre-stream buffer before `STREAMING`
    pending: AudioQueue,
    inputs_tx: mpsc::Sender<SessionInput>,
    inputs_rx: mpsc::Receiver<SessionInput>,
    readers: Vec<JoinHandle<()>>,
    protocol_errors: u32,
    /// Set once `send_audio` reported the upstream gone; the reader reports why
    upstream_send_closed: bool,
    backpressure_events: u64,
    termination: Option<TerminationReason>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("session", &self.session)
            .field("pending", &self.pending.len())
            .field("connecting", &self.connecting.is_some())
            .field("streaming", &self.upstream.is_some())
            .field("termination", &self.termination)
            .finish()
    }
}

impl SessionCoordinator {
    /// Authenticate, admit and register a new session
    ///
    /// Nothing is allocated for a rejected connection: no rate-limit slot on
    /// an authentication failure, no registry entry and no audit event in
    /// either case.
    pub fn on_connect(
        core: Arc<CoreState>,
        token: Option<&str>,
    ) -> Result<Self, ConnectRejection> {
        let identity = core.authenticator.authenticate(token).inspect_err(|e| e.log())?;

        if !core.rate_limiter.admit(&identity.user_id) {
            warn!(user_id = %identity.user_id, "Session start rate limited");
            return Err(ConnectRejection::RateLimited);
        }

        Ok(Self::admitted(core, identity))
    }

    fn admitted(core: Arc<CoreState>, identity: Identity) -> Self {
        let mut session = Session::new(identity);
        if let Err(e) = session.state.advance(SessionState::Authenticated) {
            error!(session_id = %session.session_id, "{}", e);
        }

        let shutdown = Arc::new(Notify::new());
        let registered = core.registry.register(SessionEntry {
            session_id: session.session_id.clone(),
            identity: session.identity.clone(),
            started_at: session.started_at,
            shutdown: shutdown.clone(),
        });
        if !registered {
            error!(session_id = %session.session_id, "Duplicate session id in registry");
        }

        info!(
            session_id = %session.session_id,
            user_id = %session.identity.user_id,
            tenant_id = %session.identity.tenant_id,
            started_at = session.started_at,
            "Session authenticated"
        );

        let auth_deadline = session
            .identity
            .remaining_validity(unix_millis())
            .map(|left| Instant::now() + left);

        let (inputs_tx, inputs_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let pending = AudioQueue::new(core.session.pre_stream_buffer_chunks);

        Self {
            core,
            session,
            shutdown,
            link: None,
            upstream: None,
            connecting: None,
            auth_deadline,
            pending,
            inputs_tx,
            inputs_rx,
            readers: Vec::new(),
            protocol_errors: 0,
            upstream_send_closed: false,
            backpressure_events: 0,
            termination: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Chunks accepted but not yet handed to the upstream
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    pub fn is_streaming(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.is_some()
    }

    /// Route outbound messages and the final close frame through `link`
    pub fn attach_client(&mut self, link: ClientLink) {
        self.link = Some(link);
    }

    /// Drive the session until it has been torn down
    pub async fn run<S>(mut self, inbound: S, link: ClientLink) -> TerminationReason
    where
        S: Stream<Item = ClientFrame> + Send + Unpin + 'static,
    {
        self.attach_client(link);
        self.spawn_client_reader(inbound);

        let period = self.core.session.inactivity_check_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let expires = self.auth_deadline;
        let auth_expiry = sleep_until(expires.unwrap_or_else(Instant::now));
        tokio::pin!(auth_expiry);

        while !self.session.state.is_terminating() {
            let forwarding = self.upstream.is_some()
                && !self.upstream_send_closed
                && !self.pending.is_empty();

            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    self.teardown(TerminationReason::ServerShutdown).await;
                }
                _ = &mut auth_expiry, if expires.is_some() => {
                    self.on_auth_expired().await;
                }
                _ = ticker.tick() => {
                    self.check_inactivity(Instant::now()).await;
                }
                attempt = connect_outcome(&mut self.connecting), if self.connecting.is_some() => {
                    self.connecting = None;
                    self.on_upstream_connected(attempt).await;
                }
                result = forward_front(self.upstream.as_ref(), self.pending.front()), if forwarding => {
                    self.on_forward_result(result);
                }
                input = self.inputs_rx.recv() => match input {
                    Some(SessionInput::Client(frame)) => self.on_client_frame(frame).await,
                    Some(SessionInput::Upstream(event)) => self.on_upstream_event(event).await,
                    None => self.teardown(TerminationReason::ClientClosed).await,
                },
            }
        }

        self.termination.unwrap_or(TerminationReason::ClientClosed)
    }

    fn spawn_client_reader<S>(&mut self, mut inbound: S)
    where
        S: Stream<Item = ClientFrame> + Send + Unpin + 'static,
    {
        let inputs = self.inputs_tx.clone();
        self.readers.push(tokio::spawn(async move {
            while let Some(frame) = inbound.next().await {
                let closed = frame == ClientFrame::Closed;
                if inputs.send(SessionInput::Client(frame)).await.is_err() || closed {
                    return;
                }
            }
            let _ = inputs.send(SessionInput::Client(ClientFrame::Closed)).await;
        }));
    }

    fn spawn_upstream_reader(&mut self, mut receiver: UpstreamReceiver) {
        let inputs = self.inputs_tx.clone();
        self.readers.push(tokio::spawn(async move {
            loop {
                let event = receiver.receive().await;
                let terminal = event.is_terminal();
                if inputs.send(SessionInput::Upstream(event)).await.is_err() || terminal {
                    return;
                }
            }
        }));
    }

    async fn on_client_frame(&mut self, frame: ClientFrame) {
        match frame {
            ClientFrame::Text(text) => self.on_control_message(&text).await,
            ClientFrame::Binary(chunk) => self.on_audio_chunk(chunk),
            ClientFrame::Closed => {
                debug!(session_id = %self.session.session_id, "Client closed the connection");
                self.teardown(TerminationReason::ClientClosed).await;
            }
        }
    }

    /// Handle a text frame from the client
    ///
    /// The first valid control message fixes the language hint and starts the
    /// upstream connect. Later ones are refused with `language_already_set`
    /// and do not count as protocol errors.
    pub async fn on_control_message(&mut self, text: &str) {
        if self.session.state.is_terminating() {
            return;
        }

        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.on_protocol_error(e).await;
                return;
            }
        };
        self.protocol_errors = 0;

        if self.session.state == SessionState::Streaming || self.connecting.is_some() {
            debug!(
                session_id = %self.session.session_id,
                requested = ?message.language,
                "Ignoring language change while streaming"
            );
            self.notify_client(OutgoingMessage::error(
                error_codes::LANGUAGE_ALREADY_SET,
                "language hint is fixed once streaming has started",
            ));
            return;
        }

        self.session.language_hint = message.language;
        self.start_streaming().await;
    }

    async fn start_streaming(&mut self) {
        if self.core.health.should_fail_fast() {
            warn!(
                session_id = %self.session.session_id,
                "Upstream recently unavailable, failing fast"
            );
            self.fail_upstream_connect(UpstreamError::Unreachable(
                "recent upstream failure".to_string(),
            ))
            .await;
            return;
        }

        let connector = self.core.connector.clone();
        let language = self.session.language_hint.clone();
        let connect_timeout = self.core.session.connect_timeout();
        debug!(session_id = %self.session.session_id, ?language, "Connecting upstream");

        self.connecting = Some(
            async move {
                let started = Instant::now();
                let result = match timeout(connect_timeout, connector.connect(language)).await {
                    Ok(result) => result,
                    Err(_) => Err(UpstreamError::ConnectTimeout(connect_timeout)),
                };
                (result, started.elapsed())
            }
            .boxed(),
        );
    }

    async fn on_upstream_connected(
        &mut self,
        (result, elapsed): (Result<UpstreamClient, UpstreamError>, Duration),
    ) {
        match result {
            Ok(client) => {
                self.core.health.record_connect_success(elapsed);
                if let Err(e) = self.session.state.advance(SessionState::Streaming) {
                    error!(session_id = %self.session.session_id, "{}", e);
                    client.close();
                    return;
                }

                let (sender, receiver) = client.split();
                self.upstream = Some(sender);
                self.spawn_upstream_reader(receiver);
                self.pending.set_capacity(self.core.session.audio_queue_chunks);

                info!(
                    session_id = %self.session.session_id,
                    language = ?self.session.language_hint,
                    buffered = self.pending.len(),
                    connect_ms = elapsed.as_millis() as u64,
                    "Session streaming"
                );
            }
            Err(e) => {
                if e.is_connect_failure() {
                    self.core.health.record_connect_failure();
                }
                self.fail_upstream_connect(e).await;
            }
        }
    }

    async fn fail_upstream_connect(&mut self, e: UpstreamError) {
        error!(session_id = %self.session.session_id, "Upstream connect failed: {}", e);
        self.record_error(error_codes::UPSTREAM_UNAVAILABLE);
        self.notify_client(OutgoingMessage::error(
            error_codes::UPSTREAM_UNAVAILABLE,
            "transcription service is unavailable, please retry later",
        ));
        self.teardown(TerminationReason::UpstreamUnavailable).await;
    }

    async fn on_protocol_error(&mut self, e: ProtocolError) {
        self.protocol_errors += 1;
        let limit = self.core.session.max_consecutive_protocol_errors;
        warn!(
            session_id = %self.session.session_id,
            count = self.protocol_errors,
            limit,
            "Malformed client message: {}", e
        );

        self.notify_client(OutgoingMessage::error(e.code(), e.to_string()));

        if self.protocol_errors >= limit {
            self.record_error(e.code());
            self.teardown(TerminationReason::ProtocolViolation).await;
        }
    }

    /// Accept one audio chunk from the client
    ///
    /// Every accepted chunk counts as activity. Before streaming it waits in
    /// the small pre-stream buffer; either way the oldest chunk is dropped
    /// when the queue is full.
    pub fn on_audio_chunk(&mut self, chunk: Bytes) {
        if !self.session.state.accepts_audio() || chunk.is_empty() {
            return;
        }

        self.protocol_errors = 0;
        self.session.bytes_in += chunk.len() as u64;
        self.session.touch();

        if self.pending.push(chunk).is_some() {
            debug!(
                session_id = %self.session.session_id,
                dropped = self.pending.dropped(),
                "Audio queue full, dropped oldest chunk"
            );
        }
    }

    fn on_forward_result(&mut self, result: SendResult) {
        match result {
            SendResult::Sent => {
                self.pending.pop_front();
            }
            SendResult::Backpressure(_) => {
                self.backpressure_events += 1;
                debug!(
                    session_id = %self.session.session_id,
                    queued = self.pending.len(),
                    "Upstream write timed out, retrying"
                );
            }
            SendResult::Closed => {
                debug!(session_id = %self.session.session_id, "Upstream no longer accepts audio");
                self.upstream_send_closed = true;
            }
        }
    }

    /// Relay one upstream event to the client, or end the session on a
    /// terminal one
    pub async fn on_upstream_event(&mut self, event: UpstreamEvent) {
        if self.session.state.is_terminating() {
            return;
        }

        match event {
            UpstreamEvent::Transcript(transcript) => {
                let delivery = match &self.link {
                    Some(link) => link.deliver(transcript.into()),
                    None => Err(DeliveryError::Disconnected),
                };
                match delivery {
                    Ok(()) => {
                        self.session.events_out += 1;
                        self.session.touch();
                    }
                    Err(DeliveryError::Saturated) => {
                        warn!(
                            session_id = %self.session.session_id,
                            "Client is not keeping up with transcription events"
                        );
                        self.teardown(TerminationReason::ClientTooSlow).await;
                    }
                    Err(DeliveryError::Disconnected) => {
                        self.teardown(TerminationReason::ClientClosed).await;
                    }
                }
            }
            UpstreamEvent::Closed => {
                warn!(session_id = %self.session.session_id, "Upstream closed mid-session");
                self.record_error(error_codes::UPSTREAM_DISCONNECTED);
                self.notify_client(OutgoingMessage::error(
                    error_codes::UPSTREAM_DISCONNECTED,
                    "transcription service closed the stream",
                ));
                self.teardown(TerminationReason::UpstreamClosed).await;
            }
            UpstreamEvent::Error(e) => {
                error!(session_id = %self.session.session_id, "Upstream failed: {}", e);
                self.record_error(e.client_code());
                self.notify_client(OutgoingMessage::error(
                    e.client_code(),
                    "transcription service error",
                ));
                self.teardown(TerminationReason::UpstreamError).await;
            }
        }
    }

    /// Tear the session down when it has been idle longer than the timeout
    pub async fn check_inactivity(&mut self, now: Instant) {
        if self.session.state.is_terminating() {
            return;
        }

        let idle = self.session.idle_for(now);
        if idle > self.core.session.inactivity_timeout() {
            info!(
                session_id = %self.session.session_id,
                idle_ms = idle.as_millis() as u64,
                "Session inactive"
            );
            self.teardown(TerminationReason::InactivityTimeout).await;
        }
    }

    async fn on_auth_expired(&mut self) {
        if self.session.state.is_terminating() {
            return;
        }

        info!(
            session_id = %self.session.session_id,
            user_id = %self.session.identity.user_id,
            "Access token expired"
        );
        self.record_error(error_codes::AUTH_EXPIRED);
        self.notify_client(OutgoingMessage::error(
            error_codes::AUTH_EXPIRED,
            "access token expired, reconnect with a fresh token",
        ));
        self.teardown(TerminationReason::AuthExpired).await;
    }

    /// End the session; later calls are no-ops
    ///
    /// Closes the upstream first and waits a bounded grace period for it,
    /// then removes the registry entry, records the audit trail and sends the
    /// client its close frame.
    pub async fn teardown(&mut self, reason: TerminationReason) {
        if self.session.state.is_terminating() {
            return;
        }

        self.termination = Some(reason);
        self.transition(SessionState::Closing);
        info!(
            session_id = %self.session.session_id,
            user_id = %self.session.identity.user_id,
            reason = %reason,
            "Session closing"
        );

        // Upstream results still in flight are discarded with the reader
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if self.connecting.take().is_some() {
            debug!(session_id = %self.session.session_id, "Abandoned upstream connect");
        }

        if let Some(upstream) = self.upstream.take() {
            upstream.close();
            let state = upstream.closed(self.core.session.upstream_close_grace()).await;
            debug!(session_id = %self.session.session_id, ?state, "Upstream released");
        }

        self.finish(reason);
    }

    fn finish(&mut self, reason: TerminationReason) {
        if self.pending.dropped() > 0 || self.backpressure_events > 0 {
            info!(
                session_id = %self.session.session_id,
                dropped_chunks = self.pending.dropped(),
                backpressure_events = self.backpressure_events,
                "Session audio congestion"
            );
        }
        let record = self
            .session
            .audit_record(reason, unix_millis(), self.pending.dropped());
        self.pending.clear();

        self.core.registry.remove(&self.session.session_id);
        self.transition(SessionState::Closed);
        self.core.audit.emit(record);

        if let Some(link) = &self.link
            && !link.close(reason.close_code(), reason.as_str())
        {
            debug!(session_id = %self.session.session_id, "Client writer already gone");
        }

        info!(
            session_id = %self.session.session_id,
            reason = %reason,
            bytes_in = self.session.bytes_in,
            events_out = self.session.events_out,
            "Session closed"
        );
    }

    fn transition(&mut self, next: SessionState) {
        if let Err(e) = self.session.state.advance(next) {
            warn!(session_id = %self.session.session_id, "{}", e);
        }
    }

    /// Best-effort delivery of an informational message
    fn notify_client(&self, message: OutgoingMessage) {
        if let Some(link) = &self.link
            && let Err(e) = link.deliver(message)
        {
            debug!(session_id = %self.session.session_id, "Could not notify client: {}", e);
        }
    }

    /// Remember the error code for the session's audit record
    fn record_error(&mut self, code: &str) {
        self.session.error_code = Some(code.to_string());
    }
}

impl Drop for SessionCoordinator {
    /// Cleanup for a coordinator dropped without completing teardown, e.g.
    /// when its task was aborted
    fn drop(&mut self) {
        if self.session.state == SessionState::Closed {
            return;
        }

        for reader in self.readers.drain(..) {
            reader.abort();
        }
        if let Some(upstream) = self.upstream.take() {
            upstream.close();
        }

        let reason = self.termination.unwrap_or(TerminationReason::ClientClosed);
        if self.termination.is_none() {
            self.termination = Some(reason);
            self.transition(SessionState::Closing);
        }
        self.finish(reason);
    }
}

async fn connect_outcome(
    connecting: &mut Option<ConnectAttempt>,
) -> (Result<UpstreamClient, UpstreamError>, Duration) {
    match connecting {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn forward_front(upstream: Option<&UpstreamSender>, chunk: Option<&Bytes>) -> SendResult {
    match (upstream, chunk) {
        (Some(upstream), Some(chunk)) => upstream.send_audio(chunk.clone()).await,
        _ => std::future::pending().await,
    }
}
