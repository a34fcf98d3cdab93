use thiserror::Error;

/// Custom error types for the p2p chat core
#[derive(Debug, Error)]
pub enum ChatError {
    /// Configuration and identity errors
    #[error("Missing required configuration: {0}")]
    ConfigurationMissing(String),

    #[error("Sign-in failed: {0}")]
    LoginFailed(String),

    /// Room and role errors
    #[error("Room {0} not found")]
    RoomNotFound(String),

    #[error("Room {0} is already paired")]
    RoomFull(String),

    /// Messaging errors
    #[error("Data channel not ready")]
    ChannelNotReady,

    #[error("Data channel already created for this session")]
    ChannelAlreadyCreated,

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Signaling store errors. Network-backed `SignalingStore`
    /// implementations map their failures into this variant via the `store`
    /// helper; the in-memory store has no failing operations.
    #[error("Signaling store error: {0}")]
    Store(String),

    /// WebRTC errors
    #[error("Failed to create offer: {0}")]
    CreateOfferFailed(String),

    #[error("Failed to create answer: {0}")]
    CreateAnswerFailed(String),

    #[error("Invalid SDP format: {0}")]
    InvalidSdp(String),

    #[error("WebRTC API error: {0}")]
    WebRtcApi(String),

    #[error("Transport failed: {0}")]
    TransportFailed(String),
}

/// Convenience type alias for Results using ChatError
pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// Helper to create store errors with context
    pub fn store(msg: impl Into<String>) -> Self {
        ChatError::Store(msg.into())
    }

    /// Helper to create WebRTC API errors
    pub fn webrtc_api(msg: impl Into<String>) -> Self {
        ChatError::WebRtcApi(msg.into())
    }
}

/// Convert webrtc::Error to ChatError
impl From<webrtc::Error> for ChatError {
    fn from(err: webrtc::Error) -> Self {
        ChatError::WebRtcApi(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::RoomFull("alpha-1".to_string());
        assert_eq!(err.to_string(), "Room alpha-1 is already paired");
    }

    #[test]
    fn test_error_helpers() {
        let err = ChatError::store("write rejected");
        assert!(matches!(err, ChatError::Store(_)));
    }
}
