//! Session-ID ⇄ platform-channel-name encoding
//!
//! The bridge names each user's text channel after their session ID:
//! unpadded base32 of the 16 ID bytes, lowercased (26 chars). The encoding
//! lives entirely in the bridge; the mux itself never canonicalizes IDs to
//! text. System bookkeeping messages are prefixed with the channel name in
//! backticks so replay can filter them out.

use data_encoding::BASE32_NOPAD;

use crate::id::Id;

/// Encode a session ID as a platform channel name
pub fn encode_channel_name(id: Id) -> String {
    BASE32_NOPAD.encode(id.as_bytes()).to_lowercase()
}

/// Decode a platform channel name back to a session ID
pub fn decode_channel_name(name: &str) -> Result<Id, NameError> {
    // Base32 expects uppercase.
    let decoded = BASE32_NOPAD
        .decode(name.to_uppercase().as_bytes())
        .map_err(|_| NameError::NotBase32)?;
    let bytes: [u8; 16] = decoded
        .try_into()
        .map_err(|v: Vec<u8>| NameError::BadLength(v.len()))?;
    Ok(Id::from_bytes(bytes))
}

/// Prefix identifying a system bookkeeping line for this session
pub fn system_prefix(id: Id) -> String {
    format!("`[{}]`\n", encode_channel_name(id))
}

/// Whether a message is a system bookkeeping line for this session
pub fn is_system_message(content: &str, id: Id) -> bool {
    content.starts_with(&system_prefix(id))
}

/// Error decoding a channel name
#[derive(Debug, PartialEq, Eq)]
pub enum NameError {
    /// Not valid unpadded base32
    NotBase32,
    /// Decoded to the wrong number of bytes
    BadLength(usize),
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameError::NotBase32 => write!(f, "channel name is not valid base32"),
            NameError::BadLength(len) => {
                write!(f, "channel name decodes to {} bytes, expected 16", len)
            }
        }
    }
}

impl std::error::Error for NameError {}
