//! Chat platform bridge
//!
//! Mirrors `chat` traffic between mux sessions and a text-chat platform:
//! one platform channel per session, named by the session ID. The mux-side
//! routing lives in [`bot`], the naming scheme in [`naming`], and the
//! platform surface in [`platform`] with a Discord REST implementation in
//! [`discord`].

mod cache;

pub mod bot;
pub mod discord;
pub mod naming;
pub mod platform;

pub use bot::{ChatBot, ChatBotConfig, ChatMessage};
pub use discord::DiscordApi;
pub use naming::{decode_channel_name, encode_channel_name};
pub use platform::{ChatPlatform, PlatformChannel, PlatformError, PlatformMessage};
