//! Upstream transcription connections
//!
//! One [`UpstreamClient`] exists per streaming session. It is created by an
//! [`UpstreamConnector`], owned by the session coordinator, and closed before
//! the session reaches its final state.

pub mod base;
pub mod messages;
pub mod speech_service;

pub use base::{
    PeerControl, SendResult, TranscriptKind, TranscriptionEvent, UpstreamClient,
    UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamPeer, UpstreamReceiver,
    UpstreamSender, UpstreamState,
};
pub use speech_service::SpeechServiceConnector;
