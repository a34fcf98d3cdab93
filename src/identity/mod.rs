use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

/// Identity asserted by the external provider at sign-in. Immutable for the
/// lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            photo_url: None,
        }
    }

    pub fn with_name(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: Some(name.into()),
            photo_url: None,
        }
    }

    /// Name used in chat payloads when the provider supplied none.
    pub fn sender_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Anonymous")
    }
}

/// External identity provider boundary. The core never provisions identity
/// itself; it only consumes whatever the provider asserts.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self) -> Result<User>;
}

/// Provider backed by environment variables, for the CLI and local setups.
///
/// `CHAT_USER_ID` is required; `CHAT_DISPLAY_NAME` and `CHAT_PHOTO_URL` are
/// optional.
pub struct EnvIdentity;

#[async_trait]
impl IdentityProvider for EnvIdentity {
    async fn sign_in(&self) -> Result<User> {
        dotenv::dotenv().ok();

        let uid = std::env::var("CHAT_USER_ID")
            .map_err(|_| ChatError::ConfigurationMissing("CHAT_USER_ID".to_string()))?;
        if uid.trim().is_empty() {
            return Err(ChatError::LoginFailed("empty user id".to_string()));
        }

        Ok(User {
            uid,
            display_name: std::env::var("CHAT_DISPLAY_NAME").ok(),
            photo_url: std::env::var("CHAT_PHOTO_URL").ok(),
        })
    }
}

/// Provider that always signs in the same user. Used by tests and by the CLI
/// when an explicit uid is passed.
pub struct StaticIdentity(pub User);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn sign_in(&self) -> Result<User> {
        Ok(self.0.clone())
    }
}
