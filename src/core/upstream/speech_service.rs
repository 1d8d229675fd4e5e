//! Streaming speech service connector
//!
//! Speaks the Deepgram-compatible live transcription protocol: one WebSocket per
//! session, binary audio frames in, JSON `Results` frames out. A `KeepAlive`
//! text frame is sent whenever no audio flowed for the keep-alive interval, and
//! a graceful close sends `CloseStream` and drains trailing results for a
//! bounded time before closing the socket.

use std::time::{Duration, Instant};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{MissedTickBehavior, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{UpstreamClient, UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamPeer};
use super::messages::{CLOSE_STREAM_MESSAGE, KEEPALIVE_MESSAGE, parse_service_message};
use crate::config::UpstreamConfig;
use crate::core::health::HealthProbe;

/// Capacity of the channel between the client and its connection task
const AUDIO_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Connector for the configured speech service
#[derive(Debug, Clone)]
pub struct SpeechServiceConnector {
    config: UpstreamConfig,
    http: reqwest::Client,
}

impl SpeechServiceConnector {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Build the WebSocket URL with query parameters
    pub fn build_url(&self, language: Option<&str>) -> Result<String, UpstreamError> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| UpstreamError::Unreachable(format!("Invalid upstream URL: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("model", &self.config.model);
            query.append_pair("encoding", &self.config.encoding);
            query.append_pair("sample_rate", &self.config.sample_rate.to_string());
            query.append_pair("channels", &self.config.channels.to_string());
            query.append_pair("interim_results", &self.config.interim_results.to_string());
            query.append_pair("punctuate", &self.config.punctuate.to_string());

            match language {
                Some(language) => {
                    query.append_pair("language", language);
                }
                None => {
                    query.append_pair("detect_language", "true");
                }
            }
        }

        Ok(url.to_string())
    }

    fn authorization(&self) -> Option<String> {
        self.config.api_key.as_ref().map(|key| format!("Token {key}"))
    }
}

/// Map a handshake failure onto the upstream error taxonomy
fn classify_connect_error(err: WsError) -> UpstreamError {
    match err {
        WsError::Http(response) => {
            UpstreamError::HandshakeRejected(format!("HTTP {}", response.status()))
        }
        WsError::Io(e) => UpstreamError::Unreachable(e.to_string()),
        WsError::Tls(e) => UpstreamError::Unreachable(format!("TLS: {e}")),
        WsError::Url(e) => UpstreamError::Unreachable(format!("Invalid URL: {e}")),
        other => UpstreamError::Network(other.to_string()),
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for SpeechServiceConnector {
    async fn connect(&self, language: Option<String>) -> Result<UpstreamClient, UpstreamError> {
        let url = self.build_url(language.as_deref())?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(classify_connect_error)?;

        if let Some(auth) = self.authorization() {
            let value = HeaderValue::from_str(&auth)
                .map_err(|e| UpstreamError::HandshakeRejected(format!("Invalid API key: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (client, peer) = UpstreamClient::pair(
            self.config.write_timeout(),
            AUDIO_CHANNEL_CAPACITY,
            EVENT_CHANNEL_CAPACITY,
        );
        peer.control.mark_connecting();

        let (ws_stream, _) = connect_async(request).await.map_err(|e| {
            let err = classify_connect_error(e);
            error!("Failed to connect to speech service: {}", err);
            err
        })?;

        info!(model = %self.config.model, language = ?language, "Connected to speech service");
        peer.control.mark_open();

        let settings = PumpSettings {
            keepalive: self.config.keepalive_interval(),
            drain: self.config.drain_timeout(),
            language,
        };
        client.attach_task(tokio::spawn(run_connection(ws_stream, peer, settings)));

        Ok(client)
    }

    async fn probe(&self) -> HealthProbe {
        let start = Instant::now();
        let mut request = self
            .http
            .get(&self.config.health_url)
            .timeout(self.config.probe_timeout());
        if let Some(auth) = self.authorization() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => HealthProbe::healthy(start.elapsed()),
            Ok(response) => {
                warn!(status = %response.status(), "Speech service probe returned an error status");
                HealthProbe::unhealthy(Some(start.elapsed()))
            }
            Err(e) => {
                warn!("Speech service probe failed: {}", e);
                HealthProbe::unhealthy(None)
            }
        }
    }

    fn name(&self) -> &'static str {
        "speech_service"
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PumpSettings {
    pub keepalive: Duration,
    pub drain: Duration,
    pub language: Option<String>,
}

enum PumpExit {
    /// The client asked to finish, or went away
    CloseRequested,
    /// The service closed the stream
    RemoteClosed,
    Failed(UpstreamError),
}

/// What one inbound frame means for the connection
enum Inbound {
    Event(UpstreamEvent),
    Nothing,
    Closed,
    Failed(UpstreamError),
}

fn classify_frame(message: Message, language: Option<&str>) -> Inbound {
    match message {
        Message::Text(text) => match parse_service_message(text.as_str(), language) {
            Ok(Some(event)) => Inbound::Event(UpstreamEvent::Transcript(event)),
            Ok(None) => Inbound::Nothing,
            Err(e) => Inbound::Failed(e),
        },
        Message::Binary(data) => {
            debug!("Unexpected binary frame from speech service: {} bytes", data.len());
            Inbound::Nothing
        }
        Message::Close(frame) => {
            debug!("Speech service closed the stream: {:?}", frame);
            Inbound::Closed
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Nothing,
    }
}

/// Drive one upstream connection until it ends
///
/// Audio is written in the order it was queued and transcripts are delivered
/// in the order they arrive.
pub(crate) async fn run_connection<S>(ws: S, peer: UpstreamPeer, settings: PumpSettings)
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send,
{
    let UpstreamPeer {
        mut audio_rx,
        events_tx,
        control,
    } = peer;
    let (mut sink, mut stream) = ws.split();
    let language = settings.language.as_deref();

    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.keepalive,
        settings.keepalive,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;

            _ = control.closing_requested() => break PumpExit::CloseRequested,

            chunk = audio_rx.recv() => match chunk {
                Some(chunk) => {
                    if let Err(e) = sink.send(Message::Binary(chunk)).await {
                        break PumpExit::Failed(UpstreamError::Network(e.to_string()));
                    }
                    keepalive.reset();
                }
                None => break PumpExit::CloseRequested,
            },

            message = stream.next() => match message {
                Some(Ok(message)) => match classify_frame(message, language) {
                    Inbound::Event(event) => {
                        if events_tx.send(event).await.is_err() {
                            break PumpExit::CloseRequested;
                        }
                    }
                    Inbound::Nothing => {}
                    Inbound::Closed => break PumpExit::RemoteClosed,
                    Inbound::Failed(e) => break PumpExit::Failed(e),
                },
                Some(Err(e)) => break PumpExit::Failed(UpstreamError::Network(e.to_string())),
                None => break PumpExit::RemoteClosed,
            },

            _ = keepalive.tick() => {
                if let Err(e) = sink.send(Message::Text(KEEPALIVE_MESSAGE.to_string().into())).await {
                    break PumpExit::Failed(UpstreamError::Network(e.to_string()));
                }
            }
        }
    };

    match exit {
        PumpExit::CloseRequested => {
            control.mark_closing();
            if sink
                .send(Message::Text(CLOSE_STREAM_MESSAGE.to_string().into()))
                .await
                .is_ok()
            {
                // Results flushed after CloseStream reach the receiver only while it is held
                let drain = async {
                    while let Some(Ok(message)) = stream.next().await {
                        match classify_frame(message, language) {
                            Inbound::Event(event) => {
                                if events_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Inbound::Nothing => {}
                            Inbound::Closed | Inbound::Failed(_) => break,
                        }
                    }
                };
                if timeout(settings.drain, drain).await.is_err() {
                    debug!("Speech service drain timed out");
                }
            }
            let _ = sink.close().await;
            control.mark_closed();
            debug!("Upstream connection closed by client request");
        }
        PumpExit::RemoteClosed => {
            control.mark_closing();
            let _ = events_tx.send(UpstreamEvent::Closed).await;
            let _ = sink.close().await;
            control.mark_closed();
            info!("Speech service ended the stream");
        }
        PumpExit::Failed(e) => {
            error!("Upstream connection failed: {}", e);
            let _ = events_tx.send(UpstreamEvent::Error(e)).await;
            control.mark_closed();
        }
    }
}
