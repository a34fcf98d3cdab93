//! Peer-to-peer chat core: two clients discover each other through a shared
//! document store, negotiate a direct WebRTC data channel, and exchange
//! ordered text messages over it.
//!
//! The store is only a relay for the offer/answer/candidate exchange; once
//! the channel is up, chat traffic never touches it.

pub mod config;
pub mod error;
pub mod identity;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::IceConfig;
pub use error::{ChatError, Result};
pub use identity::{EnvIdentity, IdentityProvider, StaticIdentity, User};
pub use session::{ChatClient, ChatMessage, ConnectionStatus, Session};
pub use signaling::{MemoryStore, Role, SignalingStore};
