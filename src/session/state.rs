use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Single coherent connection status derived from the transport and channel
/// event streams. Exactly one live value exists per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Derives `ConnectionStatus` from two independent inputs: whether the
/// transport is connected and whether the data channel is open.
///
/// Transitions are monotonic within one session:
/// `Disconnected → Connecting → Connected → Disconnected`. A new session gets
/// a fresh tracker, which is what resets the value to `Connecting`.
pub struct ConnectionStateTracker {
    transport_connected: bool,
    channel_open: bool,
    attempted: bool,
    ended: bool,
    tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionStateTracker {
    pub fn new() -> (Self, watch::Receiver<ConnectionStatus>) {
        let (tx, rx) = watch::channel(ConnectionStatus::Disconnected);
        (
            Self {
                transport_connected: false,
                channel_open: false,
                attempted: false,
                ended: false,
                tx,
            },
            rx,
        )
    }

    /// Marks the join attempt as started; status becomes `Connecting`.
    pub fn begin_attempt(&mut self) {
        self.attempted = true;
        self.publish();
    }

    pub fn on_transport_state(&mut self, state: RTCPeerConnectionState) {
        match state {
            RTCPeerConnectionState::Connected => {
                self.transport_connected = true;
            }
            RTCPeerConnectionState::Disconnected
            | RTCPeerConnectionState::Failed
            | RTCPeerConnectionState::Closed => {
                tracing::info!(?state, "Transport ended");
                self.transport_connected = false;
                self.ended = true;
            }
            _ => {
                self.transport_connected = false;
            }
        }
        self.publish();
    }

    pub fn on_channel_open(&mut self) {
        self.channel_open = true;
        self.publish();
    }

    pub fn on_channel_closed(&mut self) {
        // A channel closing after it was open ends the session
        if self.channel_open {
            self.ended = true;
        }
        self.channel_open = false;
        self.publish();
    }

    /// Teardown path: forces the terminal `Disconnected`.
    pub fn shutdown(&mut self) {
        self.ended = true;
        self.publish();
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.tx.borrow()
    }

    fn derive(&self) -> ConnectionStatus {
        if self.ended || !self.attempted {
            return ConnectionStatus::Disconnected;
        }
        if self.transport_connected && self.channel_open {
            return ConnectionStatus::Connected;
        }
        ConnectionStatus::Connecting
    }

    fn publish(&self) {
        let next = self.derive();
        let current = *self.tx.borrow();
        // Connected never regresses to Connecting within a session
        if current == ConnectionStatus::Connected && next == ConnectionStatus::Connecting {
            return;
        }
        if next != current {
            tracing::info!(status = ?next, "Connection status changed");
            self.tx.send_replace(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected_until_attempt() {
        let (mut tracker, rx) = ConnectionStateTracker::new();
        assert_eq!(*rx.borrow(), ConnectionStatus::Disconnected);

        tracker.begin_attempt();
        assert_eq!(tracker.status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn test_connected_requires_transport_and_channel() {
        let (mut tracker, _rx) = ConnectionStateTracker::new();
        tracker.begin_attempt();

        tracker.on_transport_state(RTCPeerConnectionState::Connected);
        assert_eq!(tracker.status(), ConnectionStatus::Connecting);

        tracker.on_channel_open();
        assert_eq!(tracker.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_transport_failure_is_terminal() {
        let (mut tracker, _rx) = ConnectionStateTracker::new();
        tracker.begin_attempt();
        tracker.on_transport_state(RTCPeerConnectionState::Connected);
        tracker.on_channel_open();

        tracker.on_transport_state(RTCPeerConnectionState::Failed);
        assert_eq!(tracker.status(), ConnectionStatus::Disconnected);

        // No recovery within the same session
        tracker.on_transport_state(RTCPeerConnectionState::Connected);
        tracker.on_channel_open();
        assert_eq!(tracker.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_channel_close_after_open_disconnects() {
        let (mut tracker, _rx) = ConnectionStateTracker::new();
        tracker.begin_attempt();
        tracker.on_transport_state(RTCPeerConnectionState::Connected);
        tracker.on_channel_open();
        assert_eq!(tracker.status(), ConnectionStatus::Connected);

        tracker.on_channel_closed();
        assert_eq!(tracker.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_shutdown_forces_disconnected() {
        let (mut tracker, rx) = ConnectionStateTracker::new();
        tracker.begin_attempt();
        tracker.shutdown();
        assert_eq!(*rx.borrow(), ConnectionStatus::Disconnected);
    }
}
