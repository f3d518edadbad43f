//! Identity and token collaborators.
//!
//! The room server authenticates each frame with a short-lived token that the
//! application fetches from its own HTTP endpoint. The session asks a
//! [`TokenProvider`] for one after every raw connect and only becomes ready
//! once it has it.

use async_trait::async_trait;

use crate::error::RoomSyncError;
use crate::protocol::UserId;

/// Who the local listener is, as reported by the application's session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Server-side user id, injected into every outbound frame.
    pub user_id: UserId,
    /// Name shown to other listeners.
    pub display_name: String,
    /// Avatar image, if the user has one.
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Create an identity with no avatar.
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_avatar_url(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }
}

/// Source of short-lived transport tokens.
///
/// Called once per successful raw connection, including reconnects, so
/// implementations should fetch a fresh token each time rather than cache one.
#[async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Fetch a token for the next connection.
    ///
    /// # Errors
    ///
    /// Return [`RoomSyncError::TokenUnavailable`] when no token can be issued.
    /// The session treats any error as terminal and surfaces it to the user.
    async fn fetch_token(&self) -> Result<String, RoomSyncError>;
}

/// A [`TokenProvider`] that always hands out the same token.
///
/// Useful for tests and for servers that issue long-lived tokens.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Create a provider that returns `token` on every call.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> Result<String, RoomSyncError> {
        if self.token.is_empty() {
            return Err(RoomSyncError::TokenUnavailable("empty token".into()));
        }
        Ok(self.token.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_its_token() {
        let provider = StaticTokenProvider::new("tok-1");
        assert_eq!(provider.fetch_token().await.unwrap(), "tok-1");
    }

    #[tokio::test]
    async fn empty_static_token_is_unavailable() {
        let provider = StaticTokenProvider::new("");
        let err = provider.fetch_token().await.unwrap_err();
        assert!(matches!(err, RoomSyncError::TokenUnavailable(_)));
    }

    #[test]
    fn identity_builder_sets_avatar() {
        let me = Identity::new("u1", "Ada").with_avatar_url("https://img/ada.png");
        assert_eq!(me.avatar_url.as_deref(), Some("https://img/ada.png"));
    }
}
