use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::protocol::ServerMessage;

pub type ConnectionId = Uuid;

/// Outbound half of one client connection: already-serialized text frames
/// are queued here and drained into the socket by the connection's writer task.
#[derive(Clone, Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
}

impl Connection {
    pub fn open() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                outbound,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, message: &ServerMessage) -> bool {
        match encode(message) {
            Some(text) => self.deliver(text),
            None => false,
        }
    }

    fn deliver(&self, text: String) -> bool {
        if self.outbound.send(text).is_err() {
            debug!(conn = %self.id, "recipient gone, message dropped");
            return false;
        }
        true
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match serde_json::to_string(message) {
        Ok(text) => Some(text),
        Err(err) => {
            error!(?err, "failed to encode outbound message");
            None
        }
    }
}

/// Serializes once and hands a copy to every recipient. A failed recipient
/// never stops delivery to the rest. Returns how many deliveries succeeded.
pub fn broadcast<'a>(
    recipients: impl IntoIterator<Item = &'a Connection>,
    message: &ServerMessage,
) -> usize {
    let Some(text) = encode(message) else {
        return 0;
    };
    recipients
        .into_iter()
        .filter(|conn| conn.deliver(text.clone()))
        .count()
}
