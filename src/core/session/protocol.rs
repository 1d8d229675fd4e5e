//! Client wire protocol of the transcription socket
//!
//! Inbound: one optional JSON control message, then binary audio frames.
//! Outbound: JSON `partial`, `final` and `error` messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::upstream::{TranscriptKind, TranscriptionEvent};

/// Error codes carried in outbound `error` messages
pub mod error_codes {
    pub const UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const UPSTREAM_DISCONNECTED: &str = "upstream_disconnected";
    pub const INVALID_MESSAGE: &str = "invalid_message";
    pub const INVALID_LANGUAGE: &str = "invalid_language";
    pub const LANGUAGE_ALREADY_SET: &str = "language_already_set";
    pub const AUTH_EXPIRED: &str = "auth_expired";
}

/// Longest accepted language tag (BCP 47 upper bound in practice)
const MAX_LANGUAGE_LEN: usize = 35;

/// A frame read from the client socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
    /// The client closed the socket or the transport failed
    Closed,
}

/// Control message sent by the client before streaming audio
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlMessage {
    /// Language hint; auto-detection when absent
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid control message: {0}")]
    InvalidMessage(String),
    #[error("invalid language hint '{0}'")]
    InvalidLanguage(String),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidMessage(_) => error_codes::INVALID_MESSAGE,
            ProtocolError::InvalidLanguage(_) => error_codes::INVALID_LANGUAGE,
        }
    }
}

fn is_valid_language(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_LANGUAGE_LEN
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !tag.starts_with('-')
        && !tag.ends_with('-')
}

impl ControlMessage {
    /// Parse and validate a text frame
    ///
    /// An empty or blank language is treated as absent.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut message: ControlMessage = serde_json::from_str(text)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?;

        message.language = match message.language.take() {
            Some(language) if language.trim().is_empty() => None,
            Some(language) => {
                let language = language.trim().to_string();
                if !is_valid_language(&language) {
                    return Err(ProtocolError::InvalidLanguage(language));
                }
                Some(language)
            }
            None => None,
        };

        Ok(message)
    }
}

/// Messages sent to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Partial {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Final {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl OutgoingMessage {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        OutgoingMessage::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of these plain variants cannot fail
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"internal","message":"serialization failed"}"#.to_string()
        })
    }
}

impl From<TranscriptionEvent> for OutgoingMessage {
    fn from(event: TranscriptionEvent) -> Self {
        match event.kind {
            TranscriptKind::Partial => OutgoingMessage::Partial {
                text: event.text,
                language: event.language,
            },
            TranscriptKind::Final => OutgoingMessage::Final {
                text: event.text,
                language: event.language,
            },
        }
    }
}
