use tokio::sync::mpsc;

use super::protocol::OutgoingMessage;

/// Close frame requested by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientClose {
    pub code: u16,
    pub reason: String,
}

/// Item consumed by the socket writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Message(OutgoingMessage),
    Close(ClientClose),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The outbound queue is full; the client is not reading fast enough
    #[error("outbound queue saturated")]
    Saturated,
    /// The writer is gone
    #[error("client disconnected")]
    Disconnected,
}

/// Coordinator side of the bounded queue towards the client socket
///
/// The channel is created with one extra slot that events may never occupy,
/// so the close frame always fits even when the client stopped reading.
/// The coordinator is the only producer, which keeps the capacity check and
/// the send free of races.
#[derive(Debug, Clone)]
pub struct ClientLink {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ClientLink {
    /// Create a link holding up to `outbound_capacity` undelivered events
    pub fn channel(outbound_capacity: usize) -> (ClientLink, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(outbound_capacity.max(1) + 1);
        (ClientLink { tx }, rx)
    }

    /// Queue one message without waiting
    pub fn deliver(&self, message: OutgoingMessage) -> Result<(), DeliveryError> {
        if self.tx.is_closed() {
            return Err(DeliveryError::Disconnected);
        }
        if self.tx.capacity() <= 1 {
            return Err(DeliveryError::Saturated);
        }
        self.tx
            .try_send(OutboundFrame::Message(message))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Saturated,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
            })
    }

    /// Queue the close frame; false when the writer is already gone
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.tx
            .try_send(OutboundFrame::Close(ClientClose {
                code,
                reason: reason.to_string(),
            }))
            .is_ok()
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: usize) -> OutgoingMessage {
        OutgoingMessage::Partial {
            text: format!("t{n}"),
            language: None,
        }
    }

    #[tokio::test]
    async fn test_deliver_in_order() {
        let (link, mut rx) = ClientLink::channel(4);
        link.deliver(msg(1)).unwrap();
        link.deliver(msg(2)).unwrap();

        assert_eq!(rx.recv().await, Some(OutboundFrame::Message(msg(1))));
        assert_eq!(rx.recv().await, Some(OutboundFrame::Message(msg(2))));
    }

    #[tokio::test]
    async fn test_saturation_keeps_room_for_close() {
        let (link, mut rx) = ClientLink::channel(2);
        link.deliver(msg(1)).unwrap();
        link.deliver(msg(2)).unwrap();
        assert_eq!(link.deliver(msg(3)), Err(DeliveryError::Saturated));

        assert!(link.close(4010, "client_too_slow"));

        assert_eq!(rx.recv().await, Some(OutboundFrame::Message(msg(1))));
        assert_eq!(rx.recv().await, Some(OutboundFrame::Message(msg(2))));
        assert_eq!(
            rx.recv().await,
            Some(OutboundFrame::Close(ClientClose {
                code: 4010,
                reason: "client_too_slow".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_disconnected_writer() {
        let (link, rx) = ClientLink::channel(2);
        drop(rx);
        assert!(link.is_disconnected());
        assert_eq!(link.deliver(msg(1)), Err(DeliveryError::Disconnected));
        assert!(!link.close(1000, "client_closed"));
    }
}
