use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::IceConfig;
use crate::error::{ChatError, Result};
use crate::signaling::{CandidateDocument, SessionSdp};

/// Everything the transport reports, funneled into one stream so a single
/// coordinating task owns all state transitions.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    TransportState(RTCPeerConnectionState),
    ChannelOpen,
    ChannelClosed,
    ChannelMessage(String),
    LocalCandidate(CandidateDocument),
}

/// Single-owner wrapper around the underlying transport.
///
/// Owns the peer connection and the data channel slot; the Host creates the
/// channel (at most once), the Guest accepts the incoming one (at most once).
/// `close` is idempotent and releases both.
pub struct PeerConnectionManager {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    channel_created: AtomicBool,
    closed: Arc<AtomicBool>,
    // Candidates that arrived before the remote description. `Some` while the
    // description is unset; `set_remote_description` takes the queue under the
    // lock, so nothing can be enqueued after the drain.
    pending_candidates: Mutex<Option<Vec<CandidateDocument>>>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerConnectionManager {
    /// Builds the transport with the supplied discovery endpoints and returns
    /// the manager together with its event stream.
    pub async fn new(ice: &IceConfig) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| ChatError::webrtc_api(e.to_string()))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| ChatError::webrtc_api(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice.ice_servers(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let (events, event_rx) = mpsc::unbounded_channel();

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!(?state, "Peer connection state changed");
            let _ = state_events.send(PeerEvent::TransportState(state));
            Box::pin(async {})
        }));

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_events
                            .send(PeerEvent::LocalCandidate(CandidateDocument::from_init(init)));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize local candidate");
                    }
                }
            }
            Box::pin(async {})
        }));

        Ok((
            Self {
                pc,
                channel: Arc::new(Mutex::new(None)),
                channel_created: AtomicBool::new(false),
                closed: Arc::new(AtomicBool::new(false)),
                pending_candidates: Mutex::new(Some(Vec::new())),
                events,
            },
            event_rx,
        ))
    }

    /// Host side: creates the data channel. Fails on a second call within the
    /// same session.
    pub async fn create_data_channel(&self, label: &str) -> Result<()> {
        if self.channel_created.swap(true, Ordering::SeqCst) {
            return Err(ChatError::ChannelAlreadyCreated);
        }

        let dc = self.pc.create_data_channel(label, None).await?;
        wire_channel(&self.channel, &self.events, dc);
        Ok(())
    }

    /// Guest side: accepts the Host's incoming data channel. Only the first
    /// incoming channel of a session is accepted.
    pub fn accept_incoming_channel(&self) {
        let slot = self.channel.clone();
        let events = self.events.clone();
        let accepted = Arc::new(AtomicBool::new(false));

        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            if accepted.swap(true, Ordering::SeqCst) {
                tracing::warn!(label = %dc.label(), "Ignoring additional incoming data channel");
                return Box::pin(async {});
            }
            wire_channel(&slot, &events, dc);
            Box::pin(async {})
        }));
    }

    /// Creates the local offer and applies it as the local description.
    pub async fn create_offer(&self) -> Result<SessionSdp> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| ChatError::CreateOfferFailed(e.to_string()))?;
        let sdp = SessionSdp::from_description(&offer);
        self.pc.set_local_description(offer).await?;
        Ok(sdp)
    }

    /// Creates the local answer and applies it as the local description. The
    /// remote offer must have been applied first.
    pub async fn create_answer(&self) -> Result<SessionSdp> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| ChatError::CreateAnswerFailed(e.to_string()))?;
        let sdp = SessionSdp::from_description(&answer);
        self.pc.set_local_description(answer).await?;
        Ok(sdp)
    }

    /// Applies the remote description. Idempotent: returns `Ok(false)` without
    /// touching the transport when a remote description is already set, which
    /// guards against duplicate delivery from a room subscription.
    pub async fn set_remote_description(&self, sdp: &SessionSdp) -> Result<bool> {
        if self.pc.remote_description().await.is_some() {
            tracing::debug!("Remote description already set, ignoring duplicate");
            return Ok(false);
        }
        self.pc.set_remote_description(sdp.to_description()?).await?;

        // Taking the queue retires it: from here on candidates go straight to
        // the transport instead of racing against this drain
        let pending = self
            .pending_candidates
            .lock()
            .unwrap()
            .take()
            .unwrap_or_default();
        for candidate in pending {
            if let Err(e) = self.pc.add_ice_candidate(candidate.to_init()).await {
                tracing::warn!(error = %e, "Failed to apply queued candidate");
            }
        }
        Ok(true)
    }

    /// Feeds a remote candidate into the transport. Candidates observed
    /// before the remote description are queued and applied with it. Tolerant
    /// of being called after `close`: logs and drops, never errors.
    pub async fn add_remote_candidate(&self, candidate: &CandidateDocument) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Dropping remote candidate after close");
            return;
        }
        {
            let mut queued = self.pending_candidates.lock().unwrap();
            if let Some(queue) = queued.as_mut() {
                tracing::debug!("Remote description not set yet, queuing candidate");
                queue.push(candidate.clone());
                return;
            }
        }
        if let Err(e) = self.pc.add_ice_candidate(candidate.to_init()).await {
            tracing::warn!(error = %e, "Failed to add remote candidate");
        }
    }

    /// Sends a serialized chat payload over the data channel.
    pub async fn send_text(&self, payload: String) -> Result<()> {
        let dc = {
            let slot = self.channel.lock().unwrap();
            slot.clone()
        };
        let dc = dc.ok_or(ChatError::ChannelNotReady)?;
        dc.send_text(payload).await?;
        Ok(())
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    /// Releases the data channel and the transport. Safe to call repeatedly.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let dc = {
            let mut slot = self.channel.lock().unwrap();
            slot.take()
        };
        if let Some(dc) = dc {
            if let Err(e) = dc.close().await {
                tracing::warn!(error = %e, "Error closing data channel");
            }
        }
        if let Err(e) = self.pc.close().await {
            tracing::warn!(error = %e, "Error closing peer connection");
        }
    }
}

fn wire_channel(
    slot: &Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: &mpsc::UnboundedSender<PeerEvent>,
    dc: Arc<RTCDataChannel>,
) {
    let open_events = events.clone();
    dc.on_open(Box::new(move || {
        let _ = open_events.send(PeerEvent::ChannelOpen);
        Box::pin(async {})
    }));

    let close_events = events.clone();
    dc.on_close(Box::new(move || {
        let _ = close_events.send(PeerEvent::ChannelClosed);
        Box::pin(async {})
    }));

    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let payload = String::from_utf8_lossy(&msg.data).into_owned();
        let _ = message_events.send(PeerEvent::ChannelMessage(payload));
        Box::pin(async {})
    }));

    *slot.lock().unwrap() = Some(dc);
}
