use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::messages::{now_millis, ChatMessage, MessageBus};
use super::state::{ConnectionStateTracker, ConnectionStatus};
use crate::config::IceConfig;
use crate::error::{ChatError, Result};
use crate::identity::User;
use crate::peer::{PeerConnectionManager, PeerEvent};
use crate::signaling::{
    CreateOutcome, Role, RoomDocument, SignalingChannel, SignalingStore,
};

/// Role is determined purely by what the room document looks like at join
/// time, never by prior identity: an absent room makes the joiner Host, an
/// existing room makes it Guest.
pub fn role_for_snapshot(room: Option<&RoomDocument>) -> Role {
    match room {
        None => Role::Host,
        Some(_) => Role::Guest,
    }
}

/// One active session: the negotiation coordinator plus everything it owns.
///
/// The transport, data channel, subscription tasks, role, status, and message
/// log are all fields of this one value, and `close` is the single teardown
/// path. Dropping or replacing the session cannot leak a subscription or a
/// transport.
pub struct Session {
    role: Role,
    room_id: String,
    user: User,
    peer: Arc<PeerConnectionManager>,
    bus: Arc<MessageBus>,
    tracker: Arc<Mutex<ConnectionStateTracker>>,
    status_rx: watch::Receiver<ConnectionStatus>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("room_id", &self.room_id)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Joins a room: determines role, drives the offer/answer exchange
    /// through the store, and wires candidate and event delivery.
    ///
    /// Returns once the local side of the handshake is in flight; reaching
    /// `Connected` is reported through the status watch. There is no
    /// negotiation timeout: if the peer never arrives the session stays
    /// `Connecting` until it is closed.
    pub async fn join(
        store: Arc<dyn SignalingStore>,
        ice: &IceConfig,
        user: User,
        room_id: &str,
    ) -> Result<Session> {
        let channel = SignalingChannel::new(store, room_id);

        // Role determination: check-then-create, with the create itself
        // atomic so two simultaneous first joiners still split Host/Guest.
        let snapshot = channel.read_room().await?;
        let role = match role_for_snapshot(snapshot.as_ref()) {
            Role::Host => {
                let room = RoomDocument::new(room_id, user.uid.clone(), now_millis());
                match channel.create_room(room).await? {
                    CreateOutcome::Created => Role::Host,
                    CreateOutcome::AlreadyExists => Role::Guest,
                }
            }
            Role::Guest => Role::Guest,
        };
        tracing::info!(room_id = %room_id, uid = %user.uid, ?role, "Joining room");

        if role == Role::Guest {
            let room = channel
                .read_room()
                .await?
                .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;
            // Already paired: reject instead of overwriting the answer
            if room.answer.is_some() {
                return Err(ChatError::RoomFull(room_id.to_string()));
            }
        }

        let (peer, peer_events) = PeerConnectionManager::new(ice).await?;
        let peer = Arc::new(peer);

        let (mut tracker, status_rx) = ConnectionStateTracker::new();
        tracker.begin_attempt();
        let tracker = Arc::new(Mutex::new(tracker));

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let bus = Arc::new(MessageBus::new(status_rx.clone(), outbound_tx));

        let session = Session {
            role,
            room_id: room_id.to_string(),
            user,
            peer: peer.clone(),
            bus: bus.clone(),
            tracker: tracker.clone(),
            status_rx,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = session.start(channel, peer_events, outbound_rx).await {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    async fn start(
        &self,
        channel: SignalingChannel,
        peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
    ) -> Result<()> {
        match self.role {
            Role::Host => {
                // Channel first, then offer: the offer must describe it
                self.peer.create_data_channel("chat").await?;
                let offer = self.peer.create_offer().await?;
                channel.publish_offer(offer).await?;
            }
            Role::Guest => {
                self.peer.accept_incoming_channel();
            }
        }

        let room_rx = channel.watch_room().await?;
        let candidates_rx = channel.watch_candidates(self.role.remote_collection()).await?;

        let mut tasks = self.tasks.lock().unwrap();

        tasks.push(tokio::spawn(room_task(
            self.role,
            room_rx,
            channel.clone(),
            self.peer.clone(),
        )));

        let peer = self.peer.clone();
        let mut candidates_rx = candidates_rx;
        tasks.push(tokio::spawn(async move {
            while let Some(entry) = candidates_rx.recv().await {
                peer.add_remote_candidate(&entry.candidate).await;
            }
        }));

        tasks.push(tokio::spawn(event_task(
            self.role,
            peer_events,
            channel,
            self.tracker.clone(),
            self.bus.clone(),
        )));

        let peer = self.peer.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(payload) = outbound_rx.recv().await {
                if let Err(e) = peer.send_text(payload).await {
                    tracing::warn!(error = %e, "Failed to transmit chat payload");
                }
            }
        }));

        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch handle for status changes; resolves the end-to-end "are we
    /// connected" question without polling.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn send_message(&self, text: &str) -> Result<ChatMessage> {
        self.bus.send(&self.user, text)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.bus.messages()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ChatMessage> {
        self.bus.subscribe()
    }

    /// Tears the session down: aborts every subscription task, closes the
    /// data channel and transport, and clears role-local state. Idempotent,
    /// and safe to call when negotiation never completed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(room_id = %self.room_id, "Closing session");

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in &tasks {
            task.abort();
        }

        self.peer.close().await;
        self.tracker.lock().unwrap().shutdown();
        self.bus.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        let peer = self.peer.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { peer.close().await });
        }
    }
}

/// Watches the room document for the remote description. Redeliveries of the
/// same state are absorbed by the idempotent `set_remote_description`.
async fn room_task(
    role: Role,
    mut room_rx: mpsc::UnboundedReceiver<RoomDocument>,
    channel: SignalingChannel,
    peer: Arc<PeerConnectionManager>,
) {
    while let Some(room) = room_rx.recv().await {
        match role {
            Role::Host => {
                if let Some(answer) = room.answer {
                    match peer.set_remote_description(&answer).await {
                        Ok(true) => tracing::info!("Remote answer applied"),
                        Ok(false) => {}
                        Err(e) => tracing::warn!(error = %e, "Failed to apply remote answer"),
                    }
                }
            }
            Role::Guest => {
                if let Some(offer) = room.offer {
                    match peer.set_remote_description(&offer).await {
                        Ok(true) => {
                            tracing::info!("Remote offer applied, answering");
                            if let Err(e) = answer_offer(&channel, &peer).await {
                                // A failed store write is fatal to this join
                                tracing::error!(error = %e, "Failed to publish answer, abandoning join");
                                peer.close().await;
                                return;
                            }
                        }
                        Ok(false) => {}
                        Err(e) => tracing::warn!(error = %e, "Failed to apply remote offer"),
                    }
                }
            }
        }
    }
}

async fn answer_offer(channel: &SignalingChannel, peer: &PeerConnectionManager) -> Result<()> {
    let answer = peer.create_answer().await?;
    channel.publish_answer(answer).await
}

/// The one task that consumes the transport's event stream and owns every
/// status transition for the session.
async fn event_task(
    role: Role,
    mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    channel: SignalingChannel,
    tracker: Arc<Mutex<ConnectionStateTracker>>,
    bus: Arc<MessageBus>,
) {
    while let Some(event) = peer_events.recv().await {
        match event {
            PeerEvent::TransportState(state) => {
                tracker.lock().unwrap().on_transport_state(state);
            }
            PeerEvent::ChannelOpen => {
                tracker.lock().unwrap().on_channel_open();
            }
            PeerEvent::ChannelClosed => {
                tracker.lock().unwrap().on_channel_closed();
            }
            PeerEvent::ChannelMessage(payload) => {
                if let Err(e) = bus.record_remote(&payload) {
                    tracing::warn!(error = %e, "Dropping malformed chat payload");
                }
            }
            PeerEvent::LocalCandidate(candidate) => {
                // Published as soon as it is discovered, without waiting for
                // the rest of the handshake
                if let Err(e) = channel
                    .append_candidate(role.local_collection(), candidate)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to publish local candidate");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SessionSdp;

    #[test]
    fn test_absent_room_makes_host() {
        assert_eq!(role_for_snapshot(None), Role::Host);
    }

    #[test]
    fn test_existing_room_makes_guest() {
        let room = RoomDocument::new("alpha-1", "user-a", 1);
        assert_eq!(role_for_snapshot(Some(&room)), Role::Guest);
    }

    #[test]
    fn test_rejoin_after_handshake_is_guest() {
        // A previous Host rejoining a fully negotiated room is a Guest now:
        // role follows the document, not prior identity
        let mut room = RoomDocument::new("alpha-1", "user-a", 1);
        room.offer = Some(SessionSdp {
            sdp_type: "offer".to_string(),
            sdp: "v=0\r\n".to_string(),
        });
        room.answer = Some(SessionSdp {
            sdp_type: "answer".to_string(),
            sdp: "v=0\r\n".to_string(),
        });
        assert_eq!(role_for_snapshot(Some(&room)), Role::Guest);
    }
}
