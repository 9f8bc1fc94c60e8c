//! Room presence broadcaster
//!
//! Translates per-channel 2-D position updates into fan-out to every other
//! subscriber of the room's message type, stamping the originating
//! channel's ID into the outbound payload. When a channel goes away a
//! tombstone `{id, delete: true}` is broadcast so clients can drop the
//! cursor. The first position from a channel also fires a one-time webhook
//! notification, off the broadcast path.

mod webhook;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::id::Id;
use crate::mux::{Channel, Handler, MessageType, Mux};

pub use webhook::WebhookNotifier;

const DEFAULT_JOIN_NOTICE: &str = "Someone joined the room.";

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Serialize, Deserialize)]
struct PositionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Id>,
    #[serde(default, skip_serializing_if = "is_false")]
    delete: bool,
    #[serde(default)]
    x: i64,
    #[serde(default)]
    y: i64,
}

#[derive(Debug, Serialize)]
struct Tombstone {
    id: Id,
    delete: bool,
}

/// Broadcast consumer fanning position updates out to a session family
///
/// One instance owns one message type; wire up several instances for
/// several rooms. Inbound handling spawns onto the ambient tokio runtime
/// for the webhook side effect, so the mux must be driven from within one.
pub struct RoomHub {
    mux: Arc<Mux>,
    kind: MessageType,
    notifier: WebhookNotifier,
    join_notice: String,
    // Channels whose join has already been notified; never pruned, channel
    // IDs are unique per process.
    notified: RwLock<HashSet<Id>>,
}

impl RoomHub {
    /// Create a hub broadcasting on `kind`, announcing joins to `webhook_url`
    pub fn new(mux: Arc<Mux>, kind: impl Into<MessageType>, webhook_url: &str) -> Self {
        Self {
            mux,
            kind: kind.into(),
            notifier: WebhookNotifier::new(webhook_url),
            join_notice: DEFAULT_JOIN_NOTICE.to_owned(),
            notified: RwLock::new(HashSet::new()),
        }
    }

    /// Override the join notice text
    pub fn with_join_notice(mut self, notice: impl Into<String>) -> Self {
        self.join_notice = notice.into();
        self
    }

    /// The message type this hub owns
    pub fn message_type(&self) -> &str {
        &self.kind
    }

    /// Register the hub as handler for its type and as a disconnect observer
    pub fn attach(self: &Arc<Self>) {
        self.mux
            .register_handler(&self.kind, Arc::clone(self) as Arc<dyn Handler>);

        let hub = Arc::clone(self);
        self.mux.add_disconnect_hook(move |channel, _last| {
            if let Err(err) = hub.broadcast_leave(channel.id()) {
                tracing::error!(
                    message_type = %hub.kind,
                    channel = %channel.id(),
                    error = %err,
                    "broadcast leave failed"
                );
            }
        });
    }

    fn broadcast_leave(&self, id: Id) -> Result<()> {
        let tombstone = Tombstone { id, delete: true };
        let payload = serde_json::to_vec(&tombstone).map_err(MuxError::Encoding)?;
        self.mux
            .broadcast(&self.kind, &payload, Some(&move |c: &Channel| c.id() == id))
    }

    fn notify_join_once(&self, channel_id: Id) {
        {
            let notified = self.notified.read().unwrap();
            if notified.contains(&channel_id) {
                return;
            }
        }
        self.notified.write().unwrap().insert(channel_id);

        let notifier = self.notifier.clone();
        let notice = self.join_notice.clone();
        tokio::spawn(async move {
            notifier.notify(&notice).await;
        });
    }
}

impl Handler for RoomHub {
    fn handle_message(&self, channel: &Arc<Channel>, payload: &[u8]) -> Result<()> {
        let mut update: PositionUpdate =
            serde_json::from_slice(payload).map_err(MuxError::handler)?;

        let id = channel.id();
        if update.delete {
            return self.broadcast_leave(id);
        }

        update.id = Some(id);
        let outbound = serde_json::to_vec(&update).map_err(MuxError::Encoding)?;

        self.notify_join_once(id);

        self.mux
            .broadcast(&self.kind, &outbound, Some(&move |c: &Channel| c.id() == id))
    }
}
