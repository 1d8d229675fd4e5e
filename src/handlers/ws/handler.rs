//! Axum WebSocket handler
//!
//! Admission runs before the upgrade completes; a session that passes it is
//! handed to its coordinator together with the split socket.

use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::core::session::{ClientLink, ConnectRejection, OutboundFrame, SessionCoordinator};
use crate::state::AppState;

use super::frames::{client_frame, outbound_message};

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct TranscribeParams {
    pub token: Option<String>,
}

/// WebSocket transcription handler
/// Authenticates and admits the session, then upgrades the connection
pub async fn voice_transcribe_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<TranscribeParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match SessionCoordinator::on_connect(state.core_state.clone(), params.token.as_deref()) {
        Ok(coordinator) => {
            let outbound_capacity = state.config.session.outbound_queue_events;
            let close_grace = state.config.session.client_close_grace();
            ws.on_upgrade(move |socket| {
                handle_transcribe_socket(socket, coordinator, outbound_capacity, close_grace)
            })
        }
        Err(rejection) => ws.on_upgrade(move |socket| reject_socket(socket, rejection)),
    }
}

/// Close a socket whose session was refused
async fn reject_socket(mut socket: WebSocket, rejection: ConnectRejection) {
    debug!(code = rejection.close_code(), "Rejecting WebSocket: {}", rejection);
    let close = Message::Close(Some(CloseFrame {
        code: rejection.close_code(),
        reason: rejection.reason().into(),
    }));
    if let Err(e) = socket.send(close).await {
        debug!("Failed to send rejection close frame: {}", e);
    }
}

async fn handle_transcribe_socket(
    socket: WebSocket,
    coordinator: SessionCoordinator,
    outbound_capacity: usize,
    close_grace: Duration,
) {
    let session_id = coordinator.session_id().to_string();
    info!(session_id = %session_id, "WebSocket transcription connection established");

    let (sender, receiver) = socket.split();
    let (link, outbound) = ClientLink::channel(outbound_capacity);
    let mut writer = tokio::spawn(write_outbound(sender, outbound));

    let inbound = Box::pin(receiver.filter_map(|read| async move { client_frame(read) }));
    let reason = coordinator.run(inbound, link).await;

    // The coordinator queued the close frame last; give the writer time to flush it
    if timeout(close_grace, &mut writer).await.is_err() {
        warn!(session_id = %session_id, "Client writer did not finish, aborting");
        writer.abort();
    }

    info!(session_id = %session_id, reason = %reason, "WebSocket transcription connection terminated");
}

/// Owns the socket's write half until the close frame has been sent
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        let closing = matches!(frame, OutboundFrame::Close(_));
        if let Err(e) = sender.send(outbound_message(frame)).await {
            debug!("Failed to send WebSocket message: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
}
