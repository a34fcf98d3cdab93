mod coordinator;
mod messages;
mod state;

pub use coordinator::{role_for_snapshot, Session};
pub use messages::{ChatMessage, MessageBus};
pub use state::{ConnectionStateTracker, ConnectionStatus};

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::IceConfig;
use crate::error::{ChatError, Result};
use crate::identity::User;
use crate::signaling::{Role, SignalingStore};

/// Client handle holding at most one active session.
///
/// `join` fully tears down any previous session before the new one starts, so
/// switching rooms can never leave a second transport or a leaked
/// subscription behind.
pub struct ChatClient {
    store: Arc<dyn SignalingStore>,
    ice: IceConfig,
    user: User,
    session: Option<Session>,
}

impl ChatClient {
    pub fn new(store: Arc<dyn SignalingStore>, ice: IceConfig, user: User) -> Self {
        Self {
            store,
            ice,
            user,
            session: None,
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    /// Joins a room, replacing any active session. Returns the role assigned
    /// by the room document's state at join time.
    pub async fn join(&mut self, room_id: &str) -> Result<Role> {
        if let Some(session) = self.session.take() {
            session.close().await;
        }

        let session =
            Session::join(self.store.clone(), &self.ice, self.user.clone(), room_id).await?;
        let role = session.role();
        self.session = Some(session);
        Ok(role)
    }

    /// Leaves the current room, if any. Idempotent.
    pub async fn leave(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session
            .as_ref()
            .map(|s| s.status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub fn watch_status(&self) -> Option<watch::Receiver<ConnectionStatus>> {
        self.session.as_ref().map(|s| s.watch_status())
    }

    pub fn send_message(&self, text: &str) -> Result<ChatMessage> {
        self.session
            .as_ref()
            .ok_or(ChatError::ChannelNotReady)?
            .send_message(text)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.session
            .as_ref()
            .map(|s| s.messages())
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}
