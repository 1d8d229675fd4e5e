use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures::channel::mpsc as client_mpsc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::*;
use crate::config::ServerConfig;
use crate::core::audit::{AuditSink, MemoryAuditSink};
use crate::core::health::HealthProbe;
use crate::core::state::CoreState;
use crate::core::upstream::{
    TranscriptionEvent, UpstreamClient, UpstreamConnector, UpstreamError, UpstreamEvent,
    UpstreamPeer, UpstreamState,
};

const SECRET: &str = "coordinator-test-secret";

struct MockConnector {
    peers: mpsc::UnboundedSender<(Option<String>, UpstreamPeer)>,
    connects: AtomicUsize,
    unreachable: AtomicBool,
    hang: AtomicBool,
}

impl MockConnector {
    fn new(peers: mpsc::UnboundedSender<(Option<String>, UpstreamPeer)>) -> Self {
        Self {
            peers,
            connects: AtomicUsize::new(0),
            unreachable: AtomicBool::new(false),
            hang: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl UpstreamConnector for MockConnector {
    async fn connect(&self, language: Option<String>) -> Result<UpstreamClient, UpstreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unreachable("connection refused".to_string()));
        }

        let (client, peer) = UpstreamClient::pair(Duration::from_millis(200), 4, 16);
        peer.control.mark_connecting();
        peer.control.mark_open();
        let _ = self.peers.send((language, peer));
        Ok(client)
    }

    async fn probe(&self) -> HealthProbe {
        HealthProbe::healthy(Duration::from_millis(1))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct Harness {
    core: Arc<CoreState>,
    audit: Arc<MemoryAuditSink>,
    connector: Arc<MockConnector>,
    peers: mpsc::UnboundedReceiver<(Option<String>, UpstreamPeer)>,
}

fn harness_with(configure: impl FnOnce(&mut ServerConfig)) -> Harness {
    let mut config = ServerConfig::with_jwt_secret(SECRET);
    config.session.upstream_close_grace_ms = 100;
    configure(&mut config);

    let (peers_tx, peers) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector::new(peers_tx));
    let audit = Arc::new(MemoryAuditSink::new());

    let core = CoreState::with_services(
        &config,
        connector.clone() as Arc<dyn UpstreamConnector>,
        audit.clone() as Arc<dyn AuditSink>,
    )
    .expect("core state");

    Harness {
        core,
        audit,
        connector,
        peers,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn token_expiring(user: &str, exp: u64) -> String {
    encode(
        &Header::default(),
        &json!({"sub": user, "tenant_id": "acme", "exp": exp}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn token_for(user: &str) -> String {
    token_expiring(user, unix_now() + 3600)
}

fn expired_token(user: &str) -> String {
    token_expiring(user, unix_now() - 3600)
}

struct RunningSession {
    session_id: String,
    inbound: client_mpsc::UnboundedSender<ClientFrame>,
    outbound: mpsc::Receiver<OutboundFrame>,
    task: JoinHandle<TerminationReason>,
}

impl RunningSession {
    fn send(&self, frame: ClientFrame) {
        self.inbound.unbounded_send(frame).unwrap();
    }

    fn control(&self, text: &str) {
        self.send(ClientFrame::Text(text.to_string()));
    }

    fn audio(&self, data: &'static [u8]) {
        self.send(ClientFrame::Binary(Bytes::from_static(data)));
    }

    async fn finished(&mut self) -> TerminationReason {
        (&mut self.task).await.expect("coordinator task")
    }

    async fn next_frame(&mut self) -> OutboundFrame {
        self.outbound.recv().await.expect("outbound frame")
    }

    async fn next_message(&mut self) -> OutgoingMessage {
        match self.next_frame().await {
            OutboundFrame::Message(message) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    async fn expect_close(&mut self, code: u16, reason: &str) {
        assert_eq!(
            self.next_frame().await,
            OutboundFrame::Close(ClientClose {
                code,
                reason: reason.to_string()
            })
        );
    }
}

fn start(harness: &Harness, user: &str, outbound_capacity: usize) -> RunningSession {
    start_with_token(harness, &token_for(user), outbound_capacity)
}

fn start_with_token(harness: &Harness, token: &str, outbound_capacity: usize) -> RunningSession {
    let coordinator = SessionCoordinator::on_connect(harness.core.clone(), Some(token)).unwrap();
    let session_id = coordinator.session_id().to_string();

    let (inbound, inbound_rx) = client_mpsc::unbounded();
    let (link, outbound) = ClientLink::channel(outbound_capacity);
    let task = tokio::spawn(coordinator.run(inbound_rx, link));

    RunningSession {
        session_id,
        inbound,
        outbound,
        task,
    }
}

async fn next_peer(harness: &mut Harness) -> (Option<String>, UpstreamPeer) {
    harness.peers.recv().await.expect("upstream connection")
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_session() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);
    assert!(harness.core.registry.contains(&session.session_id));

    session.control(r#"{"language": "en"}"#);
    let (language, mut peer) = next_peer(&mut harness).await;
    assert_eq!(language.as_deref(), Some("en"));

    session.audio(b"pcm-chunk");
    assert_eq!(
        peer.audio_rx.recv().await.unwrap(),
        Bytes::from_static(b"pcm-chunk")
    );

    peer.events_tx
        .send(UpstreamEvent::Transcript(TranscriptionEvent::partial(
            "hel",
            Some("en".to_string()),
        )))
        .await
        .unwrap();
    peer.events_tx
        .send(UpstreamEvent::Transcript(TranscriptionEvent::final_result(
            "hello",
            Some("en".to_string()),
        )))
        .await
        .unwrap();

    assert_eq!(
        session.next_message().await,
        OutgoingMessage::Partial {
            text: "hel".to_string(),
            language: Some("en".to_string())
        }
    );
    assert_eq!(
        session.next_message().await,
        OutgoingMessage::Final {
            text: "hello".to_string(),
            language: Some("en".to_string())
        }
    );

    session.send(ClientFrame::Closed);
    assert_eq!(session.finished().await, TerminationReason::ClientClosed);
    session.expect_close(1000, "client_closed").await;

    assert_eq!(peer.control.state(), UpstreamState::Closed);
    assert!(harness.core.registry.is_empty());

    let records = harness.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].termination_reason, TerminationReason::ClientClosed);
    assert_eq!(records[0].user_id, "alice");
    assert_eq!(records[0].tenant_id, "acme");
    assert_eq!(records[0].bytes_in, 9);
    assert_eq!(records[0].events_out, 2);
    assert!(records[0].ended_at >= records[0].started_at);
}

#[tokio::test(start_paused = true)]
async fn test_language_then_close_is_normal_termination() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control(r#"{"language": "en"}"#);
    let (_language, _peer) = next_peer(&mut harness).await;
    session.send(ClientFrame::Closed);

    assert_eq!(session.finished().await, TerminationReason::ClientClosed);
    session.expect_close(1000, "client_closed").await;
    assert_eq!(
        harness.audit.records()[0].termination_reason,
        TerminationReason::ClientClosed
    );
}

#[tokio::test(start_paused = true)]
async fn test_control_without_language_requests_detection() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    let (language, _peer) = next_peer(&mut harness).await;
    assert_eq!(language, None);

    session.send(ClientFrame::Closed);
    session.finished().await;
}

#[tokio::test(start_paused = true)]
async fn test_audio_forwarded_in_order() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control(r#"{"language": "de"}"#);
    let (_language, mut peer) = next_peer(&mut harness).await;

    let chunks: Vec<Bytes> = (0..12u8).map(|i| Bytes::from(vec![i; 4])).collect();
    for chunk in &chunks {
        session.send(ClientFrame::Binary(chunk.clone()));
    }
    for chunk in &chunks {
        assert_eq!(&peer.audio_rx.recv().await.unwrap(), chunk);
    }

    session.send(ClientFrame::Closed);
    session.finished().await;
    assert_eq!(harness.audit.records()[0].bytes_in, 48);
}

#[tokio::test(start_paused = true)]
async fn test_pre_stream_buffer_drops_oldest() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    for i in 0..7u8 {
        session.send(ClientFrame::Binary(Bytes::from(vec![i])));
    }
    session.control(r#"{"language": "en"}"#);

    let (_language, mut peer) = next_peer(&mut harness).await;
    for i in 2..7u8 {
        assert_eq!(peer.audio_rx.recv().await.unwrap(), Bytes::from(vec![i]));
    }

    session.send(ClientFrame::Closed);
    session.finished().await;
}

#[tokio::test(start_paused = true)]
async fn test_events_delivered_in_order() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    let (_language, peer) = next_peer(&mut harness).await;

    for i in 0..20 {
        peer.events_tx
            .send(UpstreamEvent::Transcript(TranscriptionEvent::partial(
                format!("word {i}"),
                None,
            )))
            .await
            .unwrap();
    }
    for i in 0..20 {
        assert_eq!(
            session.next_message().await,
            OutgoingMessage::Partial {
                text: format!("word {i}"),
                language: None
            }
        );
    }

    session.send(ClientFrame::Closed);
    session.finished().await;
    assert_eq!(harness.audit.records()[0].events_out, 20);
}

#[tokio::test(start_paused = true)]
async fn test_slow_client_is_disconnected() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 2);

    session.control("{}");
    let (_language, peer) = next_peer(&mut harness).await;

    for i in 0..3 {
        peer.events_tx
            .send(UpstreamEvent::Transcript(TranscriptionEvent::partial(
                format!("t{i}"),
                None,
            )))
            .await
            .unwrap();
    }

    assert_eq!(session.finished().await, TerminationReason::ClientTooSlow);
    session.next_message().await;
    session.next_message().await;
    session.expect_close(4010, "client_too_slow").await;

    let records = harness.audit.records();
    assert_eq!(records[0].termination_reason, TerminationReason::ClientTooSlow);
    assert_eq!(records[0].events_out, 2);
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_timeout() {
    let harness = harness();
    let mut session = start(&harness, "alice", 32);

    let started = tokio::time::Instant::now();
    assert_eq!(
        session.finished().await,
        TerminationReason::InactivityTimeout
    );
    assert!(started.elapsed() >= Duration::from_secs(30));
    session.expect_close(4009, "inactivity_timeout").await;

    assert!(harness.core.registry.is_empty());
    assert_eq!(
        harness.audit.records()[0].termination_reason,
        TerminationReason::InactivityTimeout
    );
}

#[tokio::test(start_paused = true)]
async fn test_streaming_audio_keeps_session_alive() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    let (_language, mut peer) = next_peer(&mut harness).await;

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        session.audio(b"tick");
        assert_eq!(peer.audio_rx.recv().await.unwrap(), Bytes::from_static(b"tick"));
    }
    assert!(!session.task.is_finished());

    session.send(ClientFrame::Closed);
    assert_eq!(session.finished().await, TerminationReason::ClientClosed);
}

#[tokio::test(start_paused = true)]
async fn test_pre_stream_audio_keeps_session_alive() {
    let harness = harness();
    let mut session = start(&harness, "alice", 32);

    let started = tokio::time::Instant::now();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(20)).await;
        session.audio(b"tick");
    }
    assert!(!session.task.is_finished());
    assert_eq!(harness.connector.connects.load(Ordering::SeqCst), 0);

    // Silence after the last chunk still times out
    assert_eq!(
        session.finished().await,
        TerminationReason::InactivityTimeout
    );
    assert!(started.elapsed() >= Duration::from_secs(110));
    session.expect_close(4009, "inactivity_timeout").await;
    assert_eq!(harness.audit.records()[0].bytes_in, 16);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_overflow_drops_oldest() {
    let mut harness = harness_with(|config| config.session.audio_queue_chunks = 3);
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    let (_language, mut peer) = next_peer(&mut harness).await;

    // The peer reads nothing until every chunk has been accepted
    for i in 0..20u8 {
        session.send(ClientFrame::Binary(Bytes::from(vec![i])));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut received = Vec::new();
    for _ in 0..7 {
        received.push(peer.audio_rx.recv().await.unwrap()[0]);
    }
    assert_eq!(received, [0, 1, 2, 3, 17, 18, 19]);
    assert!(
        tokio::time::timeout(Duration::from_secs(1), peer.audio_rx.recv())
            .await
            .is_err()
    );

    session.send(ClientFrame::Closed);
    assert_eq!(session.finished().await, TerminationReason::ClientClosed);

    let records = harness.audit.records();
    assert_eq!(records[0].bytes_in, 20);
    assert_eq!(records[0].dropped_chunks, 13);
}

#[tokio::test(start_paused = true)]
async fn test_token_expiry_ends_live_session() {
    let mut harness = harness();
    let mut session = start_with_token(&harness, &token_expiring("alice", unix_now() + 2), 32);

    session.control("{}");
    let (_language, peer) = next_peer(&mut harness).await;

    for _ in 0..4 {
        let _ = session
            .inbound
            .unbounded_send(ClientFrame::Binary(Bytes::from_static(b"tick")));
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(session.task.is_finished());
    assert_eq!(session.finished().await, TerminationReason::AuthExpired);

    match session.next_message().await {
        OutgoingMessage::Error { code, .. } => assert_eq!(code, "auth_expired"),
        other => panic!("unexpected message {other:?}"),
    }
    session.expect_close(4001, "auth_expired").await;
    assert_eq!(peer.control.state(), UpstreamState::Closed);
    assert!(harness.core.registry.is_empty());

    let records = harness.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].termination_reason, TerminationReason::AuthExpired);
    assert_eq!(records[0].error_code.as_deref(), Some("auth_expired"));
}

#[tokio::test(start_paused = true)]
async fn test_client_close_during_upstream_connect() {
    let harness = harness();
    harness.connector.hang.store(true, Ordering::SeqCst);
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The loop still serves the client while the connect is pending
    session.control(r#"{"language": "fr"}"#);
    match session.next_message().await {
        OutgoingMessage::Error { code, .. } => assert_eq!(code, "language_already_set"),
        other => panic!("unexpected message {other:?}"),
    }

    let closed_at = tokio::time::Instant::now();
    session.send(ClientFrame::Closed);
    assert_eq!(session.finished().await, TerminationReason::ClientClosed);
    assert!(closed_at.elapsed() < Duration::from_secs(1));
    session.expect_close(1000, "client_closed").await;

    let records = harness.audit.records();
    assert_eq!(records[0].termination_reason, TerminationReason::ClientClosed);
    assert_eq!(records[0].error_code, None);
    assert_eq!(harness.connector.connects.load(Ordering::SeqCst), 1);
    assert!(!harness.core.health.should_fail_fast());
}

#[tokio::test]
async fn test_teardown_abandons_pending_connect() {
    let harness = harness();
    harness.connector.hang.store(true, Ordering::SeqCst);
    let mut coordinator =
        SessionCoordinator::on_connect(harness.core.clone(), Some(&token_for("alice"))).unwrap();

    coordinator.on_control_message("{}").await;
    assert!(coordinator.is_connecting());
    assert!(!coordinator.is_streaming());
    assert_eq!(coordinator.state(), SessionState::Authenticated);

    coordinator.teardown(TerminationReason::ServerShutdown).await;
    assert!(!coordinator.is_connecting());
    assert_eq!(coordinator.state(), SessionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_upstream_unavailable() {
    let harness = harness();
    harness.connector.unreachable.store(true, Ordering::SeqCst);
    let mut session = start(&harness, "alice", 32);

    session.control(r#"{"language": "en"}"#);
    match session.next_message().await {
        OutgoingMessage::Error { code, .. } => assert_eq!(code, "upstream_unavailable"),
        other => panic!("unexpected message {other:?}"),
    }
    session.expect_close(1011, "upstream_unavailable").await;
    assert_eq!(
        session.finished().await,
        TerminationReason::UpstreamUnavailable
    );

    assert!(harness.core.health.should_fail_fast());
    let records = harness.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_code.as_deref(), Some("upstream_unavailable"));

    // The next session fails fast without dialing the service
    let mut second = start(&harness, "alice", 32);
    second.control("{}");
    match second.next_message().await {
        OutgoingMessage::Error { code, .. } => assert_eq!(code, "upstream_unavailable"),
        other => panic!("unexpected message {other:?}"),
    }
    second.expect_close(1011, "upstream_unavailable").await;
    assert_eq!(harness.connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_upstream_connect_timeout() {
    let harness = harness();
    harness.connector.hang.store(true, Ordering::SeqCst);
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    match session.next_message().await {
        OutgoingMessage::Error { code, .. } => assert_eq!(code, "upstream_unavailable"),
        other => panic!("unexpected message {other:?}"),
    }
    session.expect_close(1011, "upstream_unavailable").await;
}

#[tokio::test(start_paused = true)]
async fn test_upstream_drop_mid_session() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    let (_language, peer) = next_peer(&mut harness).await;
    drop(peer);

    match session.next_message().await {
        OutgoingMessage::Error { code, .. } => assert_eq!(code, "upstream_disconnected"),
        other => panic!("unexpected message {other:?}"),
    }
    session.expect_close(1011, "upstream_closed").await;
    assert_eq!(session.finished().await, TerminationReason::UpstreamClosed);
}

#[tokio::test(start_paused = true)]
async fn test_upstream_error_is_generic_to_client() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    let (_language, peer) = next_peer(&mut harness).await;
    peer.events_tx
        .send(UpstreamEvent::Error(UpstreamError::Provider(
            "quota exceeded for project 42".to_string(),
        )))
        .await
        .unwrap();

    match session.next_message().await {
        OutgoingMessage::Error { code, message } => {
            assert_eq!(code, "upstream_error");
            assert!(!message.contains("quota"));
        }
        other => panic!("unexpected message {other:?}"),
    }
    session.expect_close(1011, "upstream_error").await;
    assert_eq!(session.finished().await, TerminationReason::UpstreamError);
}

#[tokio::test(start_paused = true)]
async fn test_one_audit_record_per_session() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control("{}");
    let (_language, peer) = next_peer(&mut harness).await;
    peer.events_tx
        .send(UpstreamEvent::Error(UpstreamError::Provider("boom".to_string())))
        .await
        .unwrap();
    assert_eq!(session.finished().await, TerminationReason::UpstreamError);

    let records = harness.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_code.as_deref(), Some("upstream_error"));

    let value = serde_json::to_value(&records[0]).unwrap();
    assert_eq!(value["event"], "session_ended");
    assert_eq!(value["termination_reason"], "upstream_error");
    assert_eq!(value["session_id"], session.session_id.as_str());
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_malformed_messages() {
    let harness = harness();
    let mut session = start(&harness, "alice", 32);

    for _ in 0..3 {
        session.control("not json");
    }
    for _ in 0..3 {
        match session.next_message().await {
            OutgoingMessage::Error { code, .. } => assert_eq!(code, "invalid_message"),
            other => panic!("unexpected message {other:?}"),
        }
    }
    session.expect_close(1002, "protocol_violation").await;
    assert_eq!(
        session.finished().await,
        TerminationReason::ProtocolViolation
    );
}

#[tokio::test(start_paused = true)]
async fn test_valid_frame_resets_malformed_count() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control("not json");
    session.control(r#"{"language": "bad_tag"}"#);
    session.audio(b"pcm");
    session.control("{");
    session.control(r#"{"language": "en"}"#);

    let mut codes = Vec::new();
    for _ in 0..3 {
        if let OutgoingMessage::Error { code, .. } = session.next_message().await {
            codes.push(code);
        }
    }
    assert_eq!(codes, ["invalid_message", "invalid_language", "invalid_message"]);

    let (language, mut peer) = next_peer(&mut harness).await;
    assert_eq!(language.as_deref(), Some("en"));
    assert_eq!(peer.audio_rx.recv().await.unwrap(), Bytes::from_static(b"pcm"));

    session.send(ClientFrame::Closed);
    assert_eq!(session.finished().await, TerminationReason::ClientClosed);
}

#[tokio::test(start_paused = true)]
async fn test_language_change_while_streaming_is_rejected() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);

    session.control(r#"{"language": "en"}"#);
    let (_language, _peer) = next_peer(&mut harness).await;

    session.control(r#"{"language": "fr"}"#);
    session.control(r#"{"language": "fr"}"#);
    session.control(r#"{"language": "fr"}"#);
    for _ in 0..3 {
        match session.next_message().await {
            OutgoingMessage::Error { code, .. } => assert_eq!(code, "language_already_set"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    session.send(ClientFrame::Closed);
    assert_eq!(session.finished().await, TerminationReason::ClientClosed);
    assert_eq!(harness.connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_server_shutdown_closes_session() {
    let mut harness = harness();
    let mut session = start(&harness, "alice", 32);
    session.control("{}");
    let (_language, peer) = next_peer(&mut harness).await;

    assert_eq!(harness.core.registry.shutdown_all(), 1);
    assert_eq!(session.finished().await, TerminationReason::ServerShutdown);
    session.expect_close(1001, "server_shutdown").await;
    assert_eq!(peer.control.state(), UpstreamState::Closed);
}

#[tokio::test]
async fn test_expired_token_rejected_without_side_effects() {
    let harness = harness();
    let rejection =
        SessionCoordinator::on_connect(harness.core.clone(), Some(&expired_token("alice")))
            .unwrap_err();

    assert!(matches!(rejection, ConnectRejection::Unauthenticated(_)));
    assert_eq!(rejection.close_code(), 4001);
    assert!(harness.core.registry.is_empty());
    assert!(harness.audit.is_empty());
    assert_eq!(harness.core.rate_limiter.tracked_users(), 0);
}

#[tokio::test]
async fn test_missing_token_rejected() {
    let harness = harness();
    let rejection = SessionCoordinator::on_connect(harness.core.clone(), None).unwrap_err();
    assert_eq!(rejection.close_code(), 4001);
    assert_eq!(rejection.reason(), "unauthenticated");
}

#[tokio::test]
async fn test_rate_limit_rejects_eleventh_session() {
    let harness = harness();
    let mut admitted = Vec::new();
    for _ in 0..10 {
        admitted.push(
            SessionCoordinator::on_connect(harness.core.clone(), Some(&token_for("alice")))
                .unwrap(),
        );
    }

    let rejection =
        SessionCoordinator::on_connect(harness.core.clone(), Some(&token_for("alice")))
            .unwrap_err();
    assert!(matches!(rejection, ConnectRejection::RateLimited));
    assert_eq!(rejection.close_code(), 4008);
    assert_eq!(harness.core.registry.len(), 10);

    // Another user is unaffected
    assert!(SessionCoordinator::on_connect(harness.core.clone(), Some(&token_for("bob"))).is_ok());
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let harness = harness();
    let mut coordinator =
        SessionCoordinator::on_connect(harness.core.clone(), Some(&token_for("alice"))).unwrap();
    let (link, mut outbound) = ClientLink::channel(4);
    coordinator.attach_client(link);

    coordinator.teardown(TerminationReason::ClientClosed).await;
    coordinator.teardown(TerminationReason::ClientClosed).await;
    coordinator.teardown(TerminationReason::InactivityTimeout).await;

    assert_eq!(coordinator.state(), SessionState::Closed);
    assert_eq!(coordinator.termination(), Some(TerminationReason::ClientClosed));
    drop(coordinator);

    assert_eq!(harness.audit.records().len(), 1);
    assert!(harness.core.registry.is_empty());
    assert!(matches!(
        outbound.recv().await,
        Some(OutboundFrame::Close(ClientClose { code: 1000, .. }))
    ));
    assert!(outbound.recv().await.is_none());
}

#[tokio::test]
async fn test_dropped_coordinator_still_audits() {
    let harness = harness();
    let coordinator =
        SessionCoordinator::on_connect(harness.core.clone(), Some(&token_for("alice"))).unwrap();
    assert_eq!(harness.core.registry.len(), 1);

    drop(coordinator);
    assert!(harness.core.registry.is_empty());
    assert_eq!(harness.audit.records().len(), 1);
}

#[tokio::test]
async fn test_audio_ignored_after_teardown() {
    let harness = harness();
    let mut coordinator =
        SessionCoordinator::on_connect(harness.core.clone(), Some(&token_for("alice"))).unwrap();

    coordinator.on_audio_chunk(Bytes::from_static(b"early"));
    assert_eq!(coordinator.pending_len(), 1);
    assert_eq!(coordinator.session().bytes_in, 5);

    coordinator.teardown(TerminationReason::ClientClosed).await;
    coordinator.on_audio_chunk(Bytes::from_static(b"late"));
    assert_eq!(coordinator.pending_len(), 0);
    assert_eq!(coordinator.session().bytes_in, 5);
    assert!(!coordinator.is_streaming());
}
