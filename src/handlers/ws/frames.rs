//! Mapping between axum WebSocket messages and session frames

use axum::extract::ws::{CloseFrame, Message};
use tracing::debug;

use crate::core::session::{ClientFrame, OutboundFrame};

/// Translate one socket read into a session frame
///
/// Ping and pong are answered by axum and produce nothing. Transport errors
/// read as a client close.
pub fn client_frame(read: Result<Message, axum::Error>) -> Option<ClientFrame> {
    match read {
        Ok(Message::Text(text)) => Some(ClientFrame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(data)) => Some(ClientFrame::Binary(data)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Ok(Message::Close(frame)) => {
            debug!(code = ?frame.as_ref().map(|f| f.code), "Client sent close frame");
            Some(ClientFrame::Closed)
        }
        Err(e) => {
            debug!("WebSocket read failed: {}", e);
            Some(ClientFrame::Closed)
        }
    }
}

/// Socket message for an outbound frame
pub fn outbound_message(frame: OutboundFrame) -> Message {
    match frame {
        OutboundFrame::Message(message) => Message::Text(message.to_json().into()),
        OutboundFrame::Close(close) => Message::Close(Some(CloseFrame {
            code: close.code,
            reason: close.reason.into(),
        })),
    }
}
