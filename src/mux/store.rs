//! Mux core
//!
//! The central multiplexer that fans typed JSON envelopes between transport
//! connections and server-side handlers.
//!
//! # Architecture
//!
//! ```text
//!                               Mux
//!                ┌───────────────────────────────┐
//!                │ sessions: HashMap<Id, Session>│
//!                │ channels: HashMap<Id, Channel>│
//!                │ subscriptions:                │
//!                │   HashMap<type, Vec<Channel>> │
//!                │ handlers:                     │
//!                │   HashMap<type, Handler>      │
//!                └──────────────┬────────────────┘
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        ▼                      ▼                      ▼
//!   [transport]            [handlers]              [hooks]
//!   connect()              handle_message()        connect/disconnect/
//!   message()   ──────►    broadcast() ──► sink    message/subscription
//!   disconnect()           send_session()
//! ```
//!
//! One read-write lock protects the session table, the channel table, the
//! subscription index and the handler registry. Sessions and channels carry
//! their own locks; acquisition order is always mux → session → channel.
//! Hooks run after the mutating operation has released the write lock, so
//! they observe a definite before/after state. Delivery is best effort: the
//! mux holds no queues and never retries, and a failing sink write is logged
//! without removing the channel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{MuxError, Result};
use crate::id::{Id, IdSource};
use crate::mux::channel::{Channel, WriteSink};
use crate::mux::envelope::{
    encode_envelope, Envelope, MessageType, SubscribeRequest, CONTROL_PREFIX,
    MAX_MESSAGE_TYPE_LEN, MESSAGE_SIZE_LIMIT, SUBSCRIBE_ACTION, UNSUBSCRIBE_ACTION,
};
use crate::mux::hooks::Hooks;
use crate::mux::session::Session;

/// A server-side component owning all inbound messages of one type
pub trait Handler: Send + Sync {
    /// Handle one inbound payload from a channel
    ///
    /// Errors are surfaced to the mux's caller; they never tear down the
    /// channel or its subscriptions.
    fn handle_message(&self, channel: &Arc<Channel>, payload: &[u8]) -> Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Arc<Channel>, &[u8]) -> Result<()> + Send + Sync,
{
    fn handle_message(&self, channel: &Arc<Channel>, payload: &[u8]) -> Result<()> {
        self(channel, payload)
    }
}

#[derive(Default)]
struct MuxState {
    sessions: HashMap<Id, Arc<Session>>,
    channels: HashMap<Id, Arc<Channel>>,
    subscriptions: HashMap<MessageType, Vec<Arc<Channel>>>,
    handlers: HashMap<MessageType, Arc<dyn Handler>>,
}

/// Session/channel multiplexer
///
/// Connections from the same end user (same session ID) group into one
/// session; each connection is a channel within it. Channels subscribe to
/// typed message streams and handlers publish back through the send APIs.
pub struct Mux {
    ids: IdSource,
    state: RwLock<MuxState>,
    hooks: Hooks,
}

impl Mux {
    /// Create an empty mux
    pub fn new() -> Self {
        Self {
            ids: IdSource::new(),
            state: RwLock::new(MuxState::default()),
            hooks: Hooks::new(),
        }
    }

    /// Register the handler owning a message type
    ///
    /// Registration is one-shot; registering a second handler for the same
    /// type is a programming error and panics.
    pub fn register_handler(&self, kind: &str, handler: Arc<dyn Handler>) {
        assert!(!kind.is_empty(), "message type must not be empty");
        assert!(kind.len() <= MAX_MESSAGE_TYPE_LEN, "message type too long");

        let mut state = self.state.write().unwrap();
        assert!(
            !state.handlers.contains_key(kind),
            "handler already registered for message type {kind:?}"
        );
        state.handlers.insert(kind.to_owned(), handler);
    }

    /// Create a new channel in the session with the given ID
    ///
    /// If no session exists one is created. Connect hooks run after the
    /// channel and session are in place; the returned ID is the new
    /// channel's.
    pub fn connect(&self, session_id: Id, sink: Box<dyn WriteSink>) -> Id {
        let channel_id = self.ids.next_id();
        let channel = Arc::new(Channel::new(channel_id, session_id, sink));

        let first_channel = {
            let mut state = self.state.write().unwrap();
            let (session, created) = match state.sessions.get(&session_id) {
                Some(session) => (Arc::clone(session), false),
                None => {
                    let session = Arc::new(Session::new(session_id));
                    state.sessions.insert(session_id, Arc::clone(&session));
                    (session, true)
                }
            };
            session.add_channel(Arc::clone(&channel));
            state.channels.insert(channel_id, Arc::clone(&channel));
            created
        };

        tracing::debug!(
            session = %session_id,
            channel = %channel_id,
            first_channel,
            "channel connected"
        );
        self.hooks.run_connect(&channel, first_channel);

        channel_id
    }

    /// Remove a channel from a session
    ///
    /// No-op when the session or channel does not exist. The channel is
    /// first unsubscribed from every message type (running subscription
    /// hooks), then removed; when it was the session's last channel the
    /// session is destroyed too. Disconnect hooks run after removal.
    pub fn disconnect(&self, session_id: Id, channel_id: Id) {
        tracing::info!(session = %session_id, channel = %channel_id, "mux disconnect");

        let session = match self.session(session_id) {
            Some(session) => session,
            None => return,
        };
        let channel = match session.channel(channel_id) {
            Some(channel) => channel,
            None => return,
        };

        for kind in channel.subscriptions() {
            self.unsubscribe_channel(&channel, &kind);
        }

        let last_channel = {
            let mut state = self.state.write().unwrap();
            state.channels.remove(&channel_id);
            let remaining = session.remove_channel(channel_id);
            if remaining == 0 {
                state.sessions.remove(&session_id);
            }
            remaining == 0
        };

        channel.tear_down();
        self.hooks.run_disconnect(&channel, last_channel);
    }

    /// Route one inbound envelope from a channel
    ///
    /// `mux:`-prefixed types go to the control plane; everything else goes
    /// to the registered handler for the type, if any. Message hooks run
    /// after the handler regardless of its outcome.
    pub fn message(&self, session_id: Id, channel_id: Id, data: &[u8]) -> Result<()> {
        let session = self
            .session(session_id)
            .ok_or(MuxError::UnknownSession(session_id))?;
        let channel = session
            .channel(channel_id)
            .ok_or(MuxError::UnknownChannel(channel_id))?;

        let envelope: Envelope =
            serde_json::from_slice(data).map_err(|err| MuxError::BadEnvelope(err.to_string()))?;
        if envelope.kind.len() > MAX_MESSAGE_TYPE_LEN {
            return Err(MuxError::BadEnvelope(format!(
                "message type too long, expected at most {} bytes but got {}",
                MAX_MESSAGE_TYPE_LEN,
                envelope.kind.len()
            )));
        }

        let result = if envelope.kind.starts_with(CONTROL_PREFIX) {
            self.handle_control(&channel, &envelope)
        } else {
            self.dispatch(&channel, &envelope)
        };

        self.hooks
            .run_message(&channel, &envelope.kind, envelope.payload_bytes());

        result
    }

    fn handle_control(&self, channel: &Arc<Channel>, envelope: &Envelope) -> Result<()> {
        let action = &envelope.kind[CONTROL_PREFIX.len()..];
        match action {
            SUBSCRIBE_ACTION | UNSUBSCRIBE_ACTION => {
                let request: SubscribeRequest = serde_json::from_slice(envelope.payload_bytes())
                    .map_err(|err| MuxError::BadEnvelope(format!("control payload: {err}")))?;
                if request.message_type.is_empty() {
                    return Err(MuxError::BadEnvelope("no MessageType provided".into()));
                }
                if request.message_type.len() > MAX_MESSAGE_TYPE_LEN {
                    return Err(MuxError::BadEnvelope(format!(
                        "MessageType too long: {} bytes",
                        request.message_type.len()
                    )));
                }

                if action == SUBSCRIBE_ACTION {
                    self.subscribe_channel(channel, &request.message_type);
                } else {
                    self.unsubscribe_channel(channel, &request.message_type);
                }
                Ok(())
            }
            _ => {
                tracing::warn!(action, "invalid mux control action");
                Ok(())
            }
        }
    }

    fn dispatch(&self, channel: &Arc<Channel>, envelope: &Envelope) -> Result<()> {
        let handler = self
            .state
            .read()
            .unwrap()
            .handlers
            .get(&envelope.kind)
            .cloned();

        match handler {
            Some(handler) => handler.handle_message(channel, envelope.payload_bytes()),
            None => Ok(()),
        }
    }

    /// Subscribe a channel to a message type
    ///
    /// Idempotent. A type without a registered handler is rejected with a
    /// warning and no state change.
    fn subscribe_channel(&self, channel: &Arc<Channel>, kind: &str) {
        assert!(!kind.is_empty(), "message type must not be empty");
        assert!(kind.len() <= MAX_MESSAGE_TYPE_LEN, "message type too long");

        if channel.is_subscribed(kind) {
            return;
        }

        {
            let state = self.state.read().unwrap();
            if !state.handlers.contains_key(kind) {
                tracing::warn!(
                    message_type = kind,
                    session = %channel.session_id(),
                    channel = %channel.id(),
                    "subscribe to message type with no registered handler"
                );
                return;
            }
        }

        {
            let mut state = self.state.write().unwrap();
            let bucket = state.subscriptions.entry(kind.to_owned()).or_default();
            // Re-check under the write lock; keeps the bucket duplicate-free.
            if bucket.iter().any(|c| c.id() == channel.id()) {
                return;
            }
            bucket.push(Arc::clone(channel));
            channel.add_subscription(kind);
        }

        self.hooks.run_subscription(channel, kind, true);
    }

    /// Remove a channel's subscription to a message type, if present
    fn unsubscribe_channel(&self, channel: &Arc<Channel>, kind: &str) {
        assert!(!kind.is_empty(), "message type must not be empty");
        assert!(kind.len() <= MAX_MESSAGE_TYPE_LEN, "message type too long");

        if !channel.is_subscribed(kind) {
            return;
        }

        {
            let mut state = self.state.write().unwrap();
            if let Some(bucket) = state.subscriptions.get_mut(kind) {
                bucket.retain(|c| c.id() != channel.id());
                if bucket.is_empty() {
                    state.subscriptions.remove(kind);
                }
            }
            channel.remove_subscription(kind);
        }

        self.hooks.run_subscription(channel, kind, false);
    }

    /// Look up a session by ID
    pub fn session(&self, session_id: Id) -> Option<Arc<Session>> {
        self.state.read().unwrap().sessions.get(&session_id).cloned()
    }

    /// Snapshot of all live sessions
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.state.read().unwrap().sessions.values().cloned().collect()
    }

    /// Look up a channel by ID
    pub fn channel(&self, channel_id: Id) -> Option<Arc<Channel>> {
        self.state.read().unwrap().channels.get(&channel_id).cloned()
    }

    /// Snapshot of the channels subscribed to a message type, in
    /// subscription order
    pub fn subscribed_channels(&self, kind: &str) -> Vec<Arc<Channel>> {
        assert!(kind.len() <= MAX_MESSAGE_TYPE_LEN, "message type too long");
        self.state
            .read()
            .unwrap()
            .subscriptions
            .get(kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Fan an envelope out to every channel subscribed to `kind`
    ///
    /// The envelope is built once and written to a snapshot of the index.
    /// Write failures are logged and swallowed; only encoding failures are
    /// returned.
    pub fn broadcast(
        &self,
        kind: &str,
        payload: &[u8],
        exclude: Option<&(dyn Fn(&Channel) -> bool)>,
    ) -> Result<()> {
        assert_send_limits(kind, payload);

        let data = encode_envelope(kind, payload)?;
        for channel in self.subscribed_channels(kind) {
            if exclude.map_or(false, |skip| skip(&channel)) {
                continue;
            }
            write_to(&channel, &data);
        }
        Ok(())
    }

    /// Send an envelope to every subscribed channel of one session
    pub fn send_session(
        &self,
        session_id: Id,
        kind: &str,
        payload: &[u8],
        exclude: Option<&(dyn Fn(&Channel) -> bool)>,
    ) -> Result<()> {
        let session = self
            .session(session_id)
            .ok_or(MuxError::UnknownSession(session_id))?;
        self.send_to_session(&session, kind, payload, exclude)
    }

    /// Resolve a channel to its session and send to that session
    pub fn send_channel_session(
        &self,
        channel_id: Id,
        kind: &str,
        payload: &[u8],
        exclude: Option<&(dyn Fn(&Channel) -> bool)>,
    ) -> Result<()> {
        let channel = self
            .channel(channel_id)
            .ok_or(MuxError::UnknownChannel(channel_id))?;
        let session = self
            .session(channel.session_id())
            .ok_or(MuxError::UnknownSession(channel.session_id()))?;
        self.send_to_session(&session, kind, payload, exclude)
    }

    fn send_to_session(
        &self,
        session: &Session,
        kind: &str,
        payload: &[u8],
        exclude: Option<&(dyn Fn(&Channel) -> bool)>,
    ) -> Result<()> {
        assert_send_limits(kind, payload);

        let data = encode_envelope(kind, payload)?;
        for channel in session.channels() {
            if !channel.is_subscribed(kind) || exclude.map_or(false, |skip| skip(&channel)) {
                continue;
            }
            write_to(&channel, &data);
        }
        Ok(())
    }

    /// Send an envelope to a single channel, iff it subscribed to `kind`
    pub fn send_channel(&self, channel_id: Id, kind: &str, payload: &[u8]) -> Result<()> {
        assert_send_limits(kind, payload);

        let channel = self
            .channel(channel_id)
            .ok_or(MuxError::UnknownChannel(channel_id))?;
        if !channel.is_subscribed(kind) {
            return Ok(());
        }

        let data = encode_envelope(kind, payload)?;
        write_to(&channel, &data);
        Ok(())
    }

    /// Register a connect observer
    pub fn add_connect_hook(&self, hook: impl Fn(&Arc<Channel>, bool) + Send + Sync + 'static) {
        self.hooks.add_connect(Arc::new(hook));
    }

    /// Register a disconnect observer
    pub fn add_disconnect_hook(&self, hook: impl Fn(&Arc<Channel>, bool) + Send + Sync + 'static) {
        self.hooks.add_disconnect(Arc::new(hook));
    }

    /// Register a message observer
    pub fn add_message_hook(
        &self,
        hook: impl Fn(&Arc<Channel>, &str, &[u8]) + Send + Sync + 'static,
    ) {
        self.hooks.add_message(Arc::new(hook));
    }

    /// Register a subscription observer for one message type
    pub fn add_subscription_hook(
        &self,
        kind: &str,
        hook: impl Fn(&Arc<Channel>, &str, bool) + Send + Sync + 'static,
    ) {
        self.hooks.add_subscription(kind, Arc::new(hook));
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

fn write_to(channel: &Channel, data: &[u8]) {
    if let Err(err) = channel.write(data) {
        tracing::warn!(
            channel = %channel.id(),
            session = %channel.session_id(),
            error = %err,
            "write on channel failed"
        );
    }
}

// Contract checks on the send paths. The payload limit does not count the
// envelope framing itself.
fn assert_send_limits(kind: &str, payload: &[u8]) {
    assert!(!kind.is_empty(), "message type must not be empty");
    assert!(kind.len() <= MAX_MESSAGE_TYPE_LEN, "message type too long");
    assert!(payload.len() <= MESSAGE_SIZE_LIMIT, "payload too long");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::mux::channel::NullSink;

    fn noop_handler() -> Arc<dyn Handler> {
        Arc::new(|_: &Arc<Channel>, _: &[u8]| Ok(()))
    }

    fn counting_sink() -> (Box<dyn WriteSink>, Arc<AtomicUsize>) {
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&writes);
        let sink = move |data: &[u8]| -> std::io::Result<usize> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(data.len())
        };
        (Box::new(sink), writes)
    }

    fn capturing_sink() -> (Box<dyn WriteSink>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&frames);
        let sink = move |data: &[u8]| -> std::io::Result<usize> {
            captured.lock().unwrap().push(data.to_vec());
            Ok(data.len())
        };
        (Box::new(sink), frames)
    }

    fn subscribe_msg(kind: &str) -> Vec<u8> {
        format!(r#"{{"type":"mux:subscribe","payload":{{"MessageType":"{kind}"}}}}"#).into_bytes()
    }

    fn unsubscribe_msg(kind: &str) -> Vec<u8> {
        format!(r#"{{"type":"mux:unsubscribe","payload":{{"MessageType":"{kind}"}}}}"#)
            .into_bytes()
    }

    fn sid(byte: u8) -> Id {
        Id::from_bytes([byte; 16])
    }

    #[test]
    fn test_connect_disconnect_refcounts_session() {
        let mux = Mux::new();
        let session_id = sid(1);

        let c1 = mux.connect(session_id, Box::new(NullSink));
        let c2 = mux.connect(session_id, Box::new(NullSink));
        assert_ne!(c1, c2);

        let session = mux.session(session_id).expect("session exists");
        assert!(session.channel(c1).is_some());
        assert!(session.channel(c2).is_some());

        mux.disconnect(session_id, c1);
        assert!(mux.session(session_id).is_some(), "one channel remains");

        mux.disconnect(session_id, c2);
        assert!(mux.session(session_id).is_none(), "last channel removed the session");

        // Targeted sends to the dead session now fail.
        let err = mux.send_session(session_id, "room", b"{}", None).unwrap_err();
        assert!(matches!(err, MuxError::UnknownSession(id) if id == session_id));
    }

    #[test]
    fn test_two_sessions_are_independent() {
        let mux = Mux::new();
        let s1 = sid(1);
        let s2 = sid(2);

        let s1c1 = mux.connect(s1, Box::new(NullSink));
        let s2c1 = mux.connect(s2, Box::new(NullSink));

        mux.disconnect(s1, s1c1);
        assert!(mux.session(s1).is_none());
        let remaining = mux.session(s2).expect("untouched session");
        assert!(remaining.channel(s2c1).is_some());
    }

    #[test]
    fn test_subscribe_without_handler_is_rejected() {
        let mux = Mux::new();
        let session_id = sid(1);
        let (sink, writes) = counting_sink();
        let channel_id = mux.connect(session_id, sink);

        // No handler for "test" yet: subscribe is dropped with a warning.
        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();
        mux.broadcast("test", b"{}", None).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 0);

        // With a handler registered the same subscribe sticks.
        mux.register_handler("test", noop_handler());
        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();
        mux.broadcast("test", b"{}", None).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disconnect_cleans_subscription_index() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let (sink, writes) = counting_sink();
        let channel_id = mux.connect(session_id, sink);
        // Second channel keeps the session alive.
        let _keeper = mux.connect(session_id, Box::new(NullSink));

        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();
        mux.disconnect(session_id, channel_id);

        mux.broadcast("test", b"{}", None).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 0);
        assert!(mux.subscribed_channels("test").is_empty());
    }

    #[test]
    fn test_send_session_is_scoped_to_the_session() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let s1 = sid(1);
        let (sink1, writes1) = counting_sink();
        let c1 = mux.connect(s1, sink1);
        mux.message(s1, c1, &subscribe_msg("test")).unwrap();

        let s2 = sid(2);
        let (sink2, writes2) = counting_sink();
        let c2 = mux.connect(s2, sink2);
        mux.message(s2, c2, &subscribe_msg("test")).unwrap();

        mux.send_session(s1, "test", b"{}", None).unwrap();
        assert_eq!(writes1.load(Ordering::SeqCst), 1);
        assert_eq!(writes2.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_send_session_skips_non_subscribers() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let (subscribed_sink, subscribed_writes) = counting_sink();
        let subscribed = mux.connect(session_id, subscribed_sink);
        let (other_sink, other_writes) = counting_sink();
        let _other = mux.connect(session_id, other_sink);

        mux.message(session_id, subscribed, &subscribe_msg("test"))
            .unwrap();
        mux.send_session(session_id, "test", b"{}", None).unwrap();

        assert_eq!(subscribed_writes.load(Ordering::SeqCst), 1);
        assert_eq!(other_writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_then_broadcast_writes_nothing() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let (sink, writes) = counting_sink();
        let channel_id = mux.connect(session_id, sink);

        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();
        mux.message(session_id, channel_id, &unsubscribe_msg("test"))
            .unwrap();

        mux.broadcast("test", b"{}", None).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 0);
        assert!(!mux.channel(channel_id).unwrap().is_subscribed("test"));
    }

    #[test]
    fn test_double_subscribe_is_deduplicated() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let (sink, writes) = counting_sink();
        let channel_id = mux.connect(session_id, sink);

        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();
        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();

        assert_eq!(mux.subscribed_channels("test").len(), 1);
        mux.broadcast("test", b"{}", None).unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broadcast_exclude_filter() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let s1 = sid(1);
        let (sink1, writes1) = counting_sink();
        let c1 = mux.connect(s1, sink1);
        mux.message(s1, c1, &subscribe_msg("test")).unwrap();

        let s2 = sid(2);
        let (sink2, writes2) = counting_sink();
        let c2 = mux.connect(s2, sink2);
        mux.message(s2, c2, &subscribe_msg("test")).unwrap();

        mux.broadcast("test", b"{}", Some(&|c: &Channel| c.id() == c1))
            .unwrap();
        assert_eq!(writes1.load(Ordering::SeqCst), 0);
        assert_eq!(writes2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_channel_requires_subscription() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let (sink, writes) = counting_sink();
        let channel_id = mux.connect(session_id, sink);

        mux.send_channel(channel_id, "test", b"{}").unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 0);

        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();
        mux.send_channel(channel_id, "test", b"{}").unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_channel_session_reaches_siblings() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let (sink_a, writes_a) = counting_sink();
        let a = mux.connect(session_id, sink_a);
        let (sink_b, writes_b) = counting_sink();
        let b = mux.connect(session_id, sink_b);

        mux.message(session_id, a, &subscribe_msg("test")).unwrap();
        mux.message(session_id, b, &subscribe_msg("test")).unwrap();

        mux.send_channel_session(a, "test", b"{}", Some(&move |c: &Channel| c.id() == a))
            .unwrap();
        assert_eq!(writes_a.load(Ordering::SeqCst), 0);
        assert_eq!(writes_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_message_routes_to_handler() {
        let mux = Mux::new();
        let handled = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&handled);
        mux.register_handler(
            "echo",
            Arc::new(move |_: &Arc<Channel>, payload: &[u8]| {
                sink.lock().unwrap().push(payload.to_vec());
                Ok(())
            }),
        );

        let session_id = sid(1);
        let channel_id = mux.connect(session_id, Box::new(NullSink));
        mux.message(
            session_id,
            channel_id,
            br#"{"type":"echo","payload":{"n":1}}"#,
        )
        .unwrap();

        assert_eq!(handled.lock().unwrap().as_slice(), &[br#"{"n":1}"#.to_vec()]);
    }

    #[test]
    fn test_message_errors() {
        let mux = Mux::new();
        let session_id = sid(1);
        let channel_id = mux.connect(session_id, Box::new(NullSink));

        let err = mux.message(sid(9), channel_id, b"{}").unwrap_err();
        assert!(matches!(err, MuxError::UnknownSession(_)));

        let err = mux
            .message(session_id, Id::from_bytes([9; 16]), b"{}")
            .unwrap_err();
        assert!(matches!(err, MuxError::UnknownChannel(_)));

        let err = mux.message(session_id, channel_id, b"not json").unwrap_err();
        assert!(matches!(err, MuxError::BadEnvelope(_)));

        let err = mux
            .message(
                session_id,
                channel_id,
                br#"{"type":"wayyyy-too-long-type","payload":{}}"#,
            )
            .unwrap_err();
        assert!(matches!(err, MuxError::BadEnvelope(_)));
    }

    #[test]
    fn test_unknown_control_action_is_dropped() {
        let mux = Mux::new();
        let session_id = sid(1);
        let channel_id = mux.connect(session_id, Box::new(NullSink));

        mux.message(
            session_id,
            channel_id,
            br#"{"type":"mux:frobnicate","payload":{}}"#,
        )
        .unwrap();
        assert!(mux.channel(channel_id).unwrap().subscriptions().is_empty());
    }

    #[test]
    fn test_handler_error_still_runs_message_hooks() {
        let mux = Mux::new();
        mux.register_handler(
            "fail",
            Arc::new(|_: &Arc<Channel>, _: &[u8]| {
                Err(MuxError::BadEnvelope("handler refused".into()))
            }),
        );

        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hook_calls);
        mux.add_message_hook(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let session_id = sid(1);
        let channel_id = mux.connect(session_id, Box::new(NullSink));
        let result = mux.message(session_id, channel_id, br#"{"type":"fail","payload":{}}"#);

        assert!(result.is_err());
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connect_hook_flags_first_channel() {
        let mux = Mux::new();
        let flags = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flags);
        mux.add_connect_hook(move |_, first| sink.lock().unwrap().push(first));

        let session_id = sid(1);
        let _c1 = mux.connect(session_id, Box::new(NullSink));
        let _c2 = mux.connect(session_id, Box::new(NullSink));

        assert_eq!(*flags.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_disconnect_hook_flags_last_channel() {
        let mux = Mux::new();
        let flags = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&flags);
        mux.add_disconnect_hook(move |_, last| sink.lock().unwrap().push(last));

        let session_id = sid(1);
        let c1 = mux.connect(session_id, Box::new(NullSink));
        let c2 = mux.connect(session_id, Box::new(NullSink));

        mux.disconnect(session_id, c1);
        mux.disconnect(session_id, c2);
        assert_eq!(*flags.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_disconnect_unknown_ids_is_noop() {
        let mux = Mux::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        mux.add_disconnect_hook(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mux.disconnect(sid(1), Id::from_bytes([2; 16]));

        let session_id = sid(3);
        let _kept = mux.connect(session_id, Box::new(NullSink));
        mux.disconnect(session_id, Id::from_bytes([4; 16]));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect_runs_unsubscribe_hooks() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        mux.add_subscription_hook("test", move |_, _, did_subscribe| {
            sink.lock().unwrap().push(did_subscribe);
        });

        let session_id = sid(1);
        let channel_id = mux.connect(session_id, Box::new(NullSink));
        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();
        mux.disconnect(session_id, channel_id);

        assert_eq!(*events.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_broadcast_payload_is_wrapped_in_envelope() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let (sink, frames) = capturing_sink();
        let channel_id = mux.connect(session_id, sink);
        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();

        mux.broadcast("test", br#"{"n":7}"#, None).unwrap();
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], br#"{"type":"test","payload":{"n":7}}"#.to_vec());
    }

    #[test]
    fn test_broadcast_invalid_payload_is_encoding_error() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());
        let err = mux.broadcast("test", b"not json", None).unwrap_err();
        assert!(matches!(err, MuxError::Encoding(_)));
    }

    #[test]
    fn test_failing_sink_does_not_remove_channel() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());

        let session_id = sid(1);
        let broken = |_: &[u8]| -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        };
        let channel_id = mux.connect(session_id, Box::new(broken));
        mux.message(session_id, channel_id, &subscribe_msg("test"))
            .unwrap();

        mux.broadcast("test", b"{}", None).unwrap();
        assert!(mux.channel(channel_id).is_some());
        assert_eq!(mux.subscribed_channels("test").len(), 1);
    }

    #[test]
    #[should_panic(expected = "handler already registered")]
    fn test_duplicate_handler_registration_panics() {
        let mux = Mux::new();
        mux.register_handler("test", noop_handler());
        mux.register_handler("test", noop_handler());
    }

    #[test]
    fn test_concurrent_churn_settles_clean() {
        let mux = Arc::new(Mux::new());
        mux.register_handler("test", noop_handler());

        std::thread::scope(|scope| {
            for t in 0u8..8 {
                let mux = Arc::clone(&mux);
                scope.spawn(move || {
                    for i in 0..100u8 {
                        let session_id = Id::from_bytes([t + 1, i, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
                        let channel_id = mux.connect(session_id, Box::new(NullSink));
                        mux.message(session_id, channel_id, &subscribe_msg("test"))
                            .unwrap();
                        mux.broadcast("test", b"{}", None).unwrap();
                        mux.disconnect(session_id, channel_id);
                        // Double disconnect is a known transport fault.
                        mux.disconnect(session_id, channel_id);
                    }
                });
            }
        });

        assert!(mux.sessions().is_empty());
        assert!(mux.subscribed_channels("test").is_empty());
    }

    #[test]
    fn test_index_and_channel_state_stay_consistent() {
        let mux = Mux::new();
        mux.register_handler("a", noop_handler());
        mux.register_handler("b", noop_handler());

        let session_id = sid(1);
        let c1 = mux.connect(session_id, Box::new(NullSink));
        let c2 = mux.connect(session_id, Box::new(NullSink));

        mux.message(session_id, c1, &subscribe_msg("a")).unwrap();
        mux.message(session_id, c1, &subscribe_msg("b")).unwrap();
        mux.message(session_id, c2, &subscribe_msg("a")).unwrap();
        mux.message(session_id, c1, &unsubscribe_msg("b")).unwrap();

        for kind in ["a", "b"] {
            let bucket = mux.subscribed_channels(kind);
            for channel in &bucket {
                assert!(channel.is_subscribed(kind));
            }
            for channel in [c1, c2] {
                let channel = mux.channel(channel).unwrap();
                let in_bucket = bucket.iter().any(|c| c.id() == channel.id());
                assert_eq!(channel.is_subscribed(kind), in_bucket);
            }
        }
    }
}
