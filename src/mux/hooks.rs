//! Lifecycle hooks
//!
//! Hooks are plain callbacks in ordered lists, not trait objects with many
//! methods: observers register only for the events they care about. All
//! hooks for an event run sequentially, in registration order, on the
//! calling thread, after the mutating operation has released its write
//! lock. A hook that calls back into the mux's send operations contends for
//! the mux lock like any other caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::mux::channel::Channel;
use crate::mux::envelope::MessageType;

/// Called after a channel is added to its session and the channel table.
/// `first_channel` is true when the connect also created the session.
pub type ConnectHook = Arc<dyn Fn(&Arc<Channel>, bool) + Send + Sync>;

/// Called after a channel is removed. `last_channel` is true when the
/// disconnect also destroyed the session.
pub type DisconnectHook = Arc<dyn Fn(&Arc<Channel>, bool) + Send + Sync>;

/// Called after a message's handler (if any) ran, regardless of outcome.
pub type MessageHook = Arc<dyn Fn(&Arc<Channel>, &str, &[u8]) + Send + Sync>;

/// Called after a channel subscribed (`did_subscribe` true) or unsubscribed
/// (false) and the index has been updated.
pub type SubscriptionHook = Arc<dyn Fn(&Arc<Channel>, &str, bool) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Hooks {
    connect: RwLock<Vec<ConnectHook>>,
    disconnect: RwLock<Vec<DisconnectHook>>,
    message: RwLock<Vec<MessageHook>>,
    subscription: RwLock<HashMap<MessageType, Vec<SubscriptionHook>>>,
}

impl Hooks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_connect(&self, hook: ConnectHook) {
        self.connect.write().unwrap().push(hook);
    }

    pub(crate) fn add_disconnect(&self, hook: DisconnectHook) {
        self.disconnect.write().unwrap().push(hook);
    }

    pub(crate) fn add_message(&self, hook: MessageHook) {
        self.message.write().unwrap().push(hook);
    }

    pub(crate) fn add_subscription(&self, kind: &str, hook: SubscriptionHook) {
        self.subscription
            .write()
            .unwrap()
            .entry(kind.to_owned())
            .or_default()
            .push(hook);
    }

    // Each run_* snapshots the list under the read lock and invokes the
    // callbacks unlocked.

    pub(crate) fn run_connect(&self, channel: &Arc<Channel>, first_channel: bool) {
        let hooks = self.connect.read().unwrap().clone();
        for hook in hooks {
            hook(channel, first_channel);
        }
    }

    pub(crate) fn run_disconnect(&self, channel: &Arc<Channel>, last_channel: bool) {
        let hooks = self.disconnect.read().unwrap().clone();
        for hook in hooks {
            hook(channel, last_channel);
        }
    }

    pub(crate) fn run_message(&self, channel: &Arc<Channel>, kind: &str, payload: &[u8]) {
        let hooks = self.message.read().unwrap().clone();
        for hook in hooks {
            hook(channel, kind, payload);
        }
    }

    pub(crate) fn run_subscription(&self, channel: &Arc<Channel>, kind: &str, did_subscribe: bool) {
        let hooks = match self.subscription.read().unwrap().get(kind) {
            Some(hooks) => hooks.clone(),
            None => return,
        };
        for hook in hooks {
            hook(channel, kind, did_subscribe);
        }
    }
}
