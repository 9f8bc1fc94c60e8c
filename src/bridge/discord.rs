//! Discord REST implementation of [`ChatPlatform`]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::platform::{ChatPlatform, PlatformChannel, PlatformError, PlatformMessage};

const API_BASE: &str = "https://discord.com/api/v10";
const GUILD_TEXT_CHANNEL: u8 = 0;

/// Discord REST API client scoped to one guild
pub struct DiscordApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
    guild_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelBody {
    id: String,
    name: String,
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    content: String,
    author: AuthorBody,
}

#[derive(Debug, Deserialize)]
struct AuthorBody {
    #[serde(default)]
    bot: bool,
}

impl DiscordApi {
    /// Create a client authenticating as a bot
    pub fn new(token: impl Into<String>, guild_id: impl Into<String>) -> Self {
        let token = token.into();
        let guild_id = guild_id.into();
        assert!(!token.is_empty(), "bot token must not be empty");
        assert!(!guild_id.is_empty(), "guild ID must not be empty");

        Self {
            http: reqwest::Client::new(),
            base_url: API_BASE.to_owned(),
            token,
            guild_id,
        }
    }

    /// Point the client at a different API base, for tests against a stub
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PlatformError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatPlatform for DiscordApi {
    async fn channels(&self) -> Result<Vec<PlatformChannel>, PlatformError> {
        let url = format!("{}/guilds/{}/channels", self.base_url, self.guild_id);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let channels: Vec<ChannelBody> = Self::check(response).await?.json().await?;

        Ok(channels
            .into_iter()
            .map(|c| PlatformChannel {
                id: c.id,
                name: c.name,
                parent_id: c.parent_id,
            })
            .collect())
    }

    async fn create_channel(
        &self,
        name: &str,
        parent_id: &str,
    ) -> Result<PlatformChannel, PlatformError> {
        #[derive(Serialize)]
        struct CreateChannelBody<'a> {
            name: &'a str,
            parent_id: &'a str,
            #[serde(rename = "type")]
            kind: u8,
        }

        let url = format!("{}/guilds/{}/channels", self.base_url, self.guild_id);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&CreateChannelBody {
                name,
                parent_id,
                kind: GUILD_TEXT_CHANNEL,
            })
            .send()
            .await?;
        let channel: ChannelBody = Self::check(response).await?.json().await?;

        tracing::info!(name, parent_id, "created platform channel");
        Ok(PlatformChannel {
            id: channel.id,
            name: channel.name,
            parent_id: channel.parent_id,
        })
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), PlatformError> {
        #[derive(Serialize)]
        struct SendMessageBody<'a> {
            content: &'a str,
        }

        let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&SendMessageBody { content })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: u8,
    ) -> Result<Vec<PlatformMessage>, PlatformError> {
        let url = format!(
            "{}/channels/{}/messages?limit={}",
            self.base_url, channel_id, limit
        );
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let messages: Vec<MessageBody> = Self::check(response).await?.json().await?;

        Ok(messages
            .into_iter()
            .map(|m| PlatformMessage {
                content: m.content,
                from_bot: m.author.bot,
            })
            .collect())
    }
}
