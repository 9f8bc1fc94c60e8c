//! Chat platform abstraction
//!
//! The bridge talks to its chat platform through this trait so the routing
//! logic can be exercised against an in-memory fake. The real
//! implementation is the Discord REST client in [`super::discord`].

use async_trait::async_trait;

/// A text channel on the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformChannel {
    /// Platform-assigned channel ID
    pub id: String,
    /// Channel name (the bridge's base32 session encoding)
    pub name: String,
    /// Parent category ID, if the channel is under one
    pub parent_id: Option<String>,
}

/// A message fetched from a platform channel
#[derive(Debug, Clone)]
pub struct PlatformMessage {
    /// Message text
    pub content: String,
    /// Whether the bridge's own bot account authored it
    pub from_bot: bool,
}

/// Error from a platform operation
#[derive(Debug)]
pub enum PlatformError {
    /// Transport-level failure (connection, timeout, TLS)
    Http(reqwest::Error),
    /// The platform answered with a non-success status
    Api { status: u16, body: String },
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformError::Http(err) => write!(f, "platform request failed: {}", err),
            PlatformError::Api { status, body } => {
                write!(f, "platform rejected request: {} {}", status, body)
            }
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlatformError::Http(err) => Some(err),
            PlatformError::Api { .. } => None,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        PlatformError::Http(err)
    }
}

/// Operations the bridge needs from its chat platform
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// List all channels of the configured guild
    async fn channels(&self) -> Result<Vec<PlatformChannel>, PlatformError>;

    /// Create a text channel under the given parent category
    async fn create_channel(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<PlatformChannel, PlatformError>;

    /// Send a message to a channel
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), PlatformError>;

    /// Fetch up to `limit` most recent messages of a channel, newest first
    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<PlatformMessage>, PlatformError>;
}
