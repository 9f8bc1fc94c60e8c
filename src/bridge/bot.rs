//! Chat bridge
//!
//! Mirrors user-to-server `chat` messages into a dedicated platform text
//! channel (one per mux session) and mirrors replies back to the
//! originating session. Each session's channel is named after the session
//! ID (base32, see [`super::naming`]) and created under a configured parent
//! category on first use.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cache::TtlCache;
use super::naming::{decode_channel_name, encode_channel_name, is_system_message, system_prefix};
use super::platform::{ChatPlatform, PlatformChannel, PlatformError};
use crate::error::{MuxError, Result};
use crate::id::Id;
use crate::mux::{Channel, Envelope, Handler, MessageType, Mux};

const PLATFORM_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest message the platform accepts
const CHAT_MESSAGE_LIMIT: usize = 2_000;

/// Inner envelope type carrying one chat line
const MESSAGE_EVENT: &str = "message";
/// Inner envelope type carrying chat history
const REPLAY_EVENT: &str = "replay";

/// Actor tag for the end user's own lines
const USER_ACTOR: &str = "user";
/// Actor tag for replies from the platform side
const HOST_ACTOR: &str = "joshua";

const DISCONNECT_NOTICE: &str = "User disconnected.";
const CHANNEL_OPENED_NOTICE: &str = "Channel opened.";

/// One chat line as carried in `message` and `replay` payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the line
    pub actor: String,
    /// The text
    pub message: String,
}

/// Error from the bridge's own message validation
#[derive(Debug)]
pub enum ChatError {
    /// Chat line with no text
    EmptyMessage,
    /// Chat line over the platform limit
    MessageTooLong(usize),
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatError::EmptyMessage => write!(f, "no message sent"),
            ChatError::MessageTooLong(len) => write!(
                f,
                "message too long, expected at most {} but got {}",
                CHAT_MESSAGE_LIMIT, len
            ),
        }
    }
}

impl std::error::Error for ChatError {}

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct ChatBotConfig {
    /// The mux message type the bridge owns
    pub message_type: MessageType,
    /// Parent category the per-session channels are created under
    pub category_id: String,
    /// How many messages one replay may fetch (platform caps at 100)
    pub replay_limit: u8,
    /// How long resolved platform channels stay cached
    pub cache_ttl: Duration,
}

impl ChatBotConfig {
    /// Config with defaults for everything but the category
    pub fn new(category_id: impl Into<String>) -> Self {
        let category_id = category_id.into();
        assert!(!category_id.is_empty(), "category ID must not be empty");
        Self {
            message_type: "chat".to_owned(),
            category_id,
            replay_limit: 100,
            cache_ttl: Duration::from_secs(30 * 60),
        }
    }

    /// Set the mux message type
    pub fn message_type(mut self, kind: impl Into<MessageType>) -> Self {
        self.message_type = kind.into();
        self
    }

    /// Set the replay fetch limit
    pub fn replay_limit(mut self, limit: u8) -> Self {
        self.replay_limit = limit.min(100);
        self
    }

    /// Set the channel cache TTL
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

// Shared guts; spawned platform work holds an Arc of this.
struct BridgeCore {
    mux: Arc<Mux>,
    platform: Arc<dyn ChatPlatform>,
    config: ChatBotConfig,
    channels: TtlCache<PlatformChannel>,
}

/// Bidirectional bridge between a chat platform and mux sessions
///
/// Register with [`ChatBot::attach`]; platform pushes enter through
/// [`ChatBot::handle_platform_message`]. Inbound handling spawns its
/// platform I/O onto the ambient tokio runtime.
pub struct ChatBot {
    core: Arc<BridgeCore>,
}

impl ChatBot {
    /// Create a bridge over the given platform
    pub fn new(mux: Arc<Mux>, platform: Arc<dyn ChatPlatform>, config: ChatBotConfig) -> Self {
        let cache_ttl = config.cache_ttl;
        Self {
            core: Arc::new(BridgeCore {
                mux,
                platform,
                config,
                channels: TtlCache::new(cache_ttl),
            }),
        }
    }

    /// The mux message type this bridge owns
    pub fn message_type(&self) -> &str {
        &self.core.config.message_type
    }

    /// Register the bridge as handler and subscription observer for its type
    pub fn attach(self: &Arc<Self>) {
        let kind = self.core.config.message_type.clone();
        self.core
            .mux
            .register_handler(&kind, Arc::clone(self) as Arc<dyn Handler>);

        let core = Arc::clone(&self.core);
        self.core
            .mux
            .add_subscription_hook(&kind, move |channel, _kind, did_subscribe| {
                let core = Arc::clone(&core);
                let channel_id = channel.id();
                let session_id = channel.session_id();
                tokio::spawn(async move {
                    let work = async {
                        if did_subscribe {
                            core.replay_chat(channel_id, session_id).await;
                        } else if let Err(err) =
                            core.send_to_user_chat(session_id, DISCONNECT_NOTICE, true).await
                        {
                            tracing::warn!(
                                session = %session_id,
                                error = %err,
                                "failed to send disconnect notice"
                            );
                        }
                    };
                    if tokio::time::timeout(PLATFORM_TIMEOUT, work).await.is_err() {
                        tracing::warn!(session = %session_id, "platform call timed out");
                    }
                });
            });
    }

    /// Route one message pushed by the platform back to its session
    ///
    /// Messages from channels outside the configured category, from the
    /// bridge's own bot account, or in channels whose name does not decode
    /// to a session ID are ignored.
    pub async fn handle_platform_message(
        &self,
        platform_channel_id: &str,
        content: &str,
        from_bot: bool,
    ) {
        if from_bot {
            return;
        }

        let channel = match self.core.platform_channel_by_id(platform_channel_id).await {
            Some(channel) => channel,
            None => {
                tracing::warn!(channel = platform_channel_id, "unknown platform channel");
                return;
            }
        };
        if channel.parent_id.as_deref() != Some(self.core.config.category_id.as_str()) {
            return;
        }

        let session_id = match decode_channel_name(&channel.name) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(
                    name = %channel.name,
                    error = %err,
                    "failed to decode platform channel name to a session ID"
                );
                return;
            }
        };

        let chat = ChatMessage {
            actor: HOST_ACTOR.to_owned(),
            message: content.to_owned(),
        };
        let data = match inner_envelope(MESSAGE_EVENT, &chat) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(error = %err, "encode platform reply");
                return;
            }
        };

        if let Err(err) =
            self.core
                .mux
                .send_session(session_id, &self.core.config.message_type, &data, None)
        {
            tracing::error!(session = %session_id, error = %err, "forward platform reply");
        }
    }
}

impl Handler for ChatBot {
    fn handle_message(&self, channel: &Arc<Channel>, payload: &[u8]) -> Result<()> {
        // The chat payload is itself an envelope: {type, payload}.
        let inner: Envelope = serde_json::from_slice(payload).map_err(MuxError::handler)?;
        if inner.kind != MESSAGE_EVENT {
            return Ok(());
        }

        let chat: ChatMessage =
            serde_json::from_slice(inner.payload_bytes()).map_err(MuxError::handler)?;
        if chat.actor != USER_ACTOR {
            return Ok(());
        }
        if chat.message.is_empty() {
            return Err(MuxError::handler(ChatError::EmptyMessage));
        }
        if chat.message.len() > CHAT_MESSAGE_LIMIT {
            return Err(MuxError::handler(ChatError::MessageTooLong(chat.message.len())));
        }

        let session_id = channel.session_id();
        let origin = channel.id();

        // Other devices of the same user see their own outgoing text.
        if let Err(err) = self.core.mux.send_session(
            session_id,
            &self.core.config.message_type,
            payload,
            Some(&move |c: &Channel| c.id() == origin),
        ) {
            tracing::error!(session = %session_id, error = %err, "mirror to session devices");
        }

        let core = Arc::clone(&self.core);
        let text = chat.message;
        tokio::spawn(async move {
            let send = core.send_to_user_chat(session_id, &text, false);
            match tokio::time::timeout(PLATFORM_TIMEOUT, send).await {
                Err(_) => tracing::warn!(session = %session_id, "platform send timed out"),
                Ok(Err(err)) => {
                    tracing::error!(session = %session_id, error = %err, "forward user message");
                }
                Ok(Ok(())) => {}
            }
        });

        Ok(())
    }
}

impl BridgeCore {
    /// Resolve (or create) the platform channel for a session
    async fn resolve_user_channel(&self, session_id: Id) -> std::result::Result<PlatformChannel, PlatformError> {
        let name = encode_channel_name(session_id);
        if let Some(channel) = self.channels.get(&name) {
            tracing::debug!(channel = %channel.id, name = %channel.name, "channel cache hit");
            return Ok(channel);
        }

        let existing = self
            .platform
            .channels()
            .await?
            .into_iter()
            .find(|c| c.name == name);

        let channel = match existing {
            Some(channel) => channel,
            None => {
                let channel = self
                    .platform
                    .create_channel(&name, &self.config.category_id)
                    .await?;
                let notice = format!("{}{}", system_prefix(session_id), CHANNEL_OPENED_NOTICE);
                if let Err(err) = self.platform.send_message(&channel.id, &notice).await {
                    tracing::warn!(
                        session = %session_id,
                        error = %err,
                        "failed to announce channel open"
                    );
                }
                channel
            }
        };

        self.channels.insert(name, channel.clone());
        Ok(channel)
    }

    /// Look up a platform channel by its platform-assigned ID
    async fn platform_channel_by_id(&self, id: &str) -> Option<PlatformChannel> {
        if let Some(channel) = self.channels.get(id) {
            return Some(channel);
        }

        let channels = match self.platform.channels().await {
            Ok(channels) => channels,
            Err(err) => {
                tracing::error!(channel = id, error = %err, "list platform channels");
                return None;
            }
        };

        let channel = channels.into_iter().find(|c| c.id == id)?;
        self.channels.insert(id.to_owned(), channel.clone());
        Some(channel)
    }

    /// Send one line to the session's platform channel
    ///
    /// A rejected send evicts the cached channel and retries once, in case
    /// the cached ID went stale.
    async fn send_to_user_chat(
        &self,
        session_id: Id,
        text: &str,
        is_system: bool,
    ) -> std::result::Result<(), PlatformError> {
        assert!(!text.is_empty(), "message must not be empty");

        let content = if is_system {
            format!("{}{}", system_prefix(session_id), text)
        } else {
            text.to_owned()
        };

        let channel = self.resolve_user_channel(session_id).await?;
        match self.platform.send_message(&channel.id, &content).await {
            Ok(()) => Ok(()),
            Err(PlatformError::Api { .. }) => {
                self.channels.remove(&encode_channel_name(session_id));
                let channel = self.resolve_user_channel(session_id).await?;
                self.platform.send_message(&channel.id, &content).await
            }
            Err(err) => Err(err),
        }
    }

    /// Push the session's chat history to one freshly subscribed channel
    async fn replay_chat(&self, channel_id: Id, session_id: Id) {
        let user_channel = match self.resolve_user_channel(session_id).await {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(session = %session_id, error = %err, "resolve channel for replay");
                return;
            }
        };

        let messages = match self
            .platform
            .recent_messages(&user_channel.id, self.config.replay_limit)
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(session = %session_id, error = %err, "fetch replay messages");
                return;
            }
        };
        if messages.is_empty() {
            return;
        }

        let mut chat: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| !is_system_message(&m.content, session_id))
            .map(|m| ChatMessage {
                actor: if m.from_bot { USER_ACTOR } else { HOST_ACTOR }.to_owned(),
                message: m.content.clone(),
            })
            .collect();
        // The platform returns newest first; replay oldest first.
        chat.reverse();

        let data = match inner_envelope(REPLAY_EVENT, &chat) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(session = %session_id, error = %err, "encode chat replay");
                return;
            }
        };

        if let Err(err) = self
            .mux
            .send_channel(channel_id, &self.config.message_type, &data)
        {
            tracing::error!(channel = %channel_id, error = %err, "send chat replay");
        }
    }
}

fn inner_envelope<T: Serialize>(kind: &str, payload: &T) -> serde_json::Result<Vec<u8>> {
    #[derive(Serialize)]
    struct Inner<'a, T> {
        #[serde(rename = "type")]
        kind: &'a str,
        payload: &'a T,
    }
    serde_json::to_vec(&Inner { kind, payload })
}
