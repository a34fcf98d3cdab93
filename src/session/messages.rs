use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};

use super::state::ConnectionStatus;
use crate::error::{ChatError, Result};
use crate::identity::User;

/// Epoch millis from the local clock.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Chat payload exchanged over the data channel, serialized as
/// `{id, text, senderId, senderName, timestamp}`. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    pub sender_name: String,
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn new(user: &User, text: impl Into<String>) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            id: format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>()),
            text: text.into(),
            sender_id: user.uid.clone(),
            sender_name: user.sender_name().to_string(),
            timestamp: now_millis(),
        }
    }
}

/// Append-only, locally ordered log of chat messages, fed by local sends and
/// remote receipts. Lives only in process memory.
///
/// Local sends are gated on `Connected` and appended optimistically once the
/// payload is handed to the outbound pump; remote receipts are appended
/// unconditionally. Send and receipt are independent append paths with no
/// deduplication between them.
pub struct MessageBus {
    log: Mutex<Vec<ChatMessage>>,
    updates: broadcast::Sender<ChatMessage>,
    status: watch::Receiver<ConnectionStatus>,
    outbound: mpsc::UnboundedSender<String>,
}

impl MessageBus {
    pub fn new(
        status: watch::Receiver<ConnectionStatus>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            log: Mutex::new(Vec::new()),
            updates,
            status,
            outbound,
        }
    }

    /// Sends a message from the local user. Rejected with `ChannelNotReady`
    /// when the session is not `Connected`: no transmission, no local append.
    pub fn send(&self, user: &User, text: &str) -> Result<ChatMessage> {
        if *self.status.borrow() != ConnectionStatus::Connected {
            return Err(ChatError::ChannelNotReady);
        }

        let message = ChatMessage::new(user, text);
        let payload = serde_json::to_string(&message)?;
        self.outbound
            .send(payload)
            .map_err(|_| ChatError::ChannelNotReady)?;

        self.append(message.clone());
        Ok(message)
    }

    /// Records a payload received from the remote peer.
    pub fn record_remote(&self, payload: &str) -> Result<ChatMessage> {
        let message: ChatMessage = serde_json::from_str(payload)?;
        self.append(message.clone());
        Ok(message)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.log.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatMessage> {
        self.updates.subscribe()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    fn append(&self, message: ChatMessage) {
        self.log.lock().unwrap().push(message.clone());
        let _ = self.updates.send(message);
    }
}
