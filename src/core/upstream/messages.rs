//! Wire messages of the streaming speech service

use serde::Deserialize;

use super::base::{TranscriptionEvent, UpstreamError};

/// Text frame asking the service to flush and finish the stream
pub const CLOSE_STREAM_MESSAGE: &str = r#"{"type":"CloseStream"}"#;

/// Text frame keeping an idle stream open
pub const KEEPALIVE_MESSAGE: &str = r#"{"type":"KeepAlive"}"#;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceMessage {
    Results(ResultsMessage),
    Metadata(MetadataMessage),
    SpeechStarted {},
    UtteranceEnd {},
    Error(ErrorMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ResultsMessage {
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    #[serde(default)]
    pub detected_language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Deserialize)]
pub struct MetadataMessage {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub model_info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Parse one text frame from the service
///
/// Returns `Ok(Some(event))` for non-empty transcripts, `Ok(None)` for frames
/// that carry nothing for the client, and an error for unparsable frames or
/// service-reported failures. `hint` fills in the language when the service
/// does not report one.
pub fn parse_service_message(
    text: &str,
    hint: Option<&str>,
) -> Result<Option<TranscriptionEvent>, UpstreamError> {
    let message: ServiceMessage = serde_json::from_str(text)
        .map_err(|e| UpstreamError::MalformedResponse(e.to_string()))?;

    match message {
        ServiceMessage::Results(results) => {
            let Some(alternative) = results.channel.alternatives.into_iter().next() else {
                return Ok(None);
            };
            if alternative.transcript.trim().is_empty() {
                return Ok(None);
            }

            let language = results
                .channel
                .detected_language
                .or_else(|| hint.map(str::to_string));
            let event = if results.is_final {
                TranscriptionEvent::final_result(alternative.transcript, language)
            } else {
                TranscriptionEvent::partial(alternative.transcript, language)
            };
            Ok(Some(event))
        }
        ServiceMessage::Metadata(metadata) => {
            tracing::debug!(request_id = ?metadata.request_id, "Speech service metadata");
            Ok(None)
        }
        ServiceMessage::SpeechStarted {} | ServiceMessage::UtteranceEnd {} => Ok(None),
        ServiceMessage::Error(error) => {
            let detail = error
                .description
                .or(error.message)
                .unwrap_or_else(|| "unknown error".to_string());
            let detail = match error.variant {
                Some(variant) => format!("{variant}: {detail}"),
                None => detail,
            };
            Err(UpstreamError::Provider(detail))
        }
        ServiceMessage::Unknown => {
            tracing::debug!("Ignoring unknown speech service message");
            Ok(None)
        }
    }
}
