mod channel;
mod store;

pub use channel::SignalingChannel;
pub use store::{CandidateEntry, CreateOutcome, MemoryStore, SignalingStore};

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{ChatError, Result};

/// Negotiation role, fixed for the lifetime of a session once determined.
///
/// The Host creates the offer and the data channel; the Guest responds with
/// the answer and accepts the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// Collection this role appends its own candidates to.
    pub fn local_collection(self) -> CandidateCollection {
        match self {
            Role::Host => CandidateCollection::Offer,
            Role::Guest => CandidateCollection::Answer,
        }
    }

    /// Collection carrying the remote peer's candidates.
    pub fn remote_collection(self) -> CandidateCollection {
        match self {
            Role::Host => CandidateCollection::Answer,
            Role::Guest => CandidateCollection::Offer,
        }
    }
}

/// One of the two append-only per-room candidate collections, partitioned by
/// the role that produced the entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateCollection {
    Offer,
    Answer,
}

impl CandidateCollection {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateCollection::Offer => "offerCandidates",
            CandidateCollection::Answer => "answerCandidates",
        }
    }
}

/// Session description as stored in the room document: `{ type, sdp }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSdp {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionSdp {
    pub fn from_description(desc: &RTCSessionDescription) -> Self {
        Self {
            sdp_type: desc.sdp_type.to_string(),
            sdp: desc.sdp.clone(),
        }
    }

    /// Rebuilds the webrtc-level description for `set_remote_description`.
    pub fn to_description(&self) -> Result<RTCSessionDescription> {
        match self.sdp_type.as_str() {
            "offer" => RTCSessionDescription::offer(self.sdp.clone())
                .map_err(|e| ChatError::InvalidSdp(e.to_string())),
            "answer" => RTCSessionDescription::answer(self.sdp.clone())
                .map_err(|e| ChatError::InvalidSdp(e.to_string())),
            other => Err(ChatError::InvalidSdp(format!(
                "unsupported sdp type: {other}"
            ))),
        }
    }
}

/// Room document shared through the signaling store.
///
/// Created at most once per room id. `offer` is written only by the Host,
/// exactly once; `answer` only by the Guest, exactly once. Neither field is
/// cleared during a session, and the document outlives both peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDocument {
    pub room_id: String,
    pub host_id: String,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionSdp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionSdp>,
}

impl RoomDocument {
    pub fn new(room_id: impl Into<String>, host_id: impl Into<String>, created_at: u64) -> Self {
        Self {
            room_id: room_id.into(),
            host_id: host_id.into(),
            created_at,
            offer: None,
            answer: None,
        }
    }
}

/// Partial update applied to an existing room document. Absent fields are
/// left untouched; present fields are only ever written once by their owning
/// role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub offer: Option<SessionSdp>,
    pub answer: Option<SessionSdp>,
}

impl RoomPatch {
    pub fn offer(sdp: SessionSdp) -> Self {
        Self {
            offer: Some(sdp),
            ..Default::default()
        }
    }

    pub fn answer(sdp: SessionSdp) -> Self {
        Self {
            answer: Some(sdp),
            ..Default::default()
        }
    }
}

/// ICE candidate as stored in a candidate collection. Append-only, never
/// updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDocument {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

impl CandidateDocument {
    pub fn from_init(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }

    pub fn to_init(&self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate.clone(),
            sdp_mid: self.sdp_mid.clone(),
            sdp_mline_index: self.sdp_mline_index,
            username_fragment: self.username_fragment.clone(),
        }
    }
}
