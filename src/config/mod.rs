use std::env;

use webrtc::ice_transport::ice_server::RTCIceServer;

use crate::error::{ChatError, Result};

/// Transport discovery configuration: the static list of STUN/TURN endpoints
/// handed to the peer connection at construction.
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

#[derive(Debug, Clone)]
pub struct TurnServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: vec![],
        }
    }
}

impl IceConfig {
    /// Loads discovery endpoints from the environment.
    ///
    /// `STUN_SERVER_URL` overrides the default Google STUN server. A TURN
    /// server is added when `TURN_SERVER_URL` is present; TURN requires
    /// `TURN_USERNAME` and `TURN_CREDENTIAL` alongside it.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let stun_server = env::var("STUN_SERVER_URL")
            .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string());

        let mut turn_servers = vec![];
        if let Ok(turn_url) = env::var("TURN_SERVER_URL") {
            let username = env::var("TURN_USERNAME")
                .map_err(|_| ChatError::ConfigurationMissing("TURN_USERNAME".to_string()))?;
            let credential = env::var("TURN_CREDENTIAL")
                .map_err(|_| ChatError::ConfigurationMissing("TURN_CREDENTIAL".to_string()))?;

            turn_servers.push(TurnServer {
                urls: vec![turn_url],
                username,
                credential,
            });
        }

        Ok(Self {
            stun_servers: vec![stun_server],
            turn_servers,
        })
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        let mut ice_servers = Vec::new();

        for stun_server in &self.stun_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![stun_server.clone()],
                ..Default::default()
            });
        }

        for turn_server in &self.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: turn_server.urls.clone(),
                username: turn_server.username.clone(),
                credential: turn_server.credential.clone(),
                credential_type:
                    webrtc::ice_transport::ice_credential_type::RTCIceCredentialType::Password,
            });
        }

        ice_servers
    }
}
