//! Session type
//!
//! A session groups all concurrent channels that share one end-user
//! identity. It is created implicitly by the first connect for a session ID
//! and destroyed implicitly when its last channel disconnects.

use std::sync::{Arc, RwLock};

use crate::id::Id;
use crate::mux::channel::Channel;

/// A set of channels sharing one identity
pub struct Session {
    id: Id,
    channels: RwLock<Vec<Arc<Channel>>>,
}

impl Session {
    pub(crate) fn new(id: Id) -> Self {
        Self {
            id,
            channels: RwLock::new(Vec::new()),
        }
    }

    /// The session's ID, as assigned by the transport
    pub fn id(&self) -> Id {
        self.id
    }

    /// Look up a channel by ID
    ///
    /// Linear scan; sessions typically hold only a few channels.
    pub fn channel(&self, channel_id: Id) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .unwrap()
            .iter()
            .find(|c| c.id() == channel_id)
            .cloned()
    }

    /// Snapshot of the session's channels, in insertion order
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.channels.read().unwrap().clone()
    }

    // Caller guarantees uniqueness of the channel ID.
    pub(crate) fn add_channel(&self, channel: Arc<Channel>) {
        self.channels.write().unwrap().push(channel);
    }

    /// Remove a channel and return how many remain
    pub(crate) fn remove_channel(&self, channel_id: Id) -> usize {
        let mut channels = self.channels.write().unwrap();
        channels.retain(|c| c.id() != channel_id);
        channels.len()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channels", &self.channels.read().unwrap().len())
            .finish()
    }
}
