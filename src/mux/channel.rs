//! Channel type and write sinks
//!
//! A channel is one transport-backed endpoint: a full-duplex connection from
//! an end user. It owns its subscription set and the sink that outbound
//! envelopes are written to.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::id::Id;
use crate::mux::envelope::MessageType;

/// Destination for outbound envelope bytes
///
/// Writes must be non-blocking from the mux's perspective; the sink owns any
/// queueing. Write errors are observed and logged by the mux but never
/// remove the channel — removal is driven only by an explicit disconnect
/// from the transport.
pub trait WriteSink: Send + Sync {
    /// Write one complete envelope
    fn write(&self, data: &[u8]) -> io::Result<usize>;
}

impl<F> WriteSink for F
where
    F: Fn(&[u8]) -> io::Result<usize> + Send + Sync,
{
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        self(data)
    }
}

/// Sink that discards everything written to it
pub struct NullSink;

impl WriteSink for NullSink {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        Ok(data.len())
    }
}

/// Sink backed by an unbounded channel, for transports that drain writes
/// from their own send task
pub struct QueueSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl QueueSink {
    /// Create a sink feeding the given sender
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { tx }
    }
}

impl WriteSink for QueueSink {
    fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "send queue closed"))?;
        Ok(data.len())
    }
}

/// One logical full-duplex connection within a session
pub struct Channel {
    id: Id,
    session_id: Id,
    sink: Box<dyn WriteSink>,
    subscriptions: RwLock<Vec<MessageType>>,
    live: AtomicBool,
}

impl Channel {
    pub(crate) fn new(id: Id, session_id: Id, sink: Box<dyn WriteSink>) -> Self {
        Self {
            id,
            session_id,
            sink,
            subscriptions: RwLock::new(Vec::new()),
            live: AtomicBool::new(true),
        }
    }

    /// The channel's own ID
    pub fn id(&self) -> Id {
        self.id
    }

    /// ID of the session this channel belongs to
    pub fn session_id(&self) -> Id {
        self.session_id
    }

    /// Whether the channel has not yet been torn down by a disconnect
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn tear_down(&self) {
        self.live.store(false, Ordering::Release);
    }

    /// Whether the channel is currently subscribed to the given type
    pub fn is_subscribed(&self, kind: &str) -> bool {
        self.subscriptions
            .read()
            .unwrap()
            .iter()
            .any(|t| t == kind)
    }

    /// Snapshot of the channel's current subscriptions
    pub fn subscriptions(&self) -> Vec<MessageType> {
        self.subscriptions.read().unwrap().clone()
    }

    // Idempotent; the index-side dedup happens under the mux lock.
    pub(crate) fn add_subscription(&self, kind: &str) {
        let mut subs = self.subscriptions.write().unwrap();
        if subs.iter().any(|t| t == kind) {
            return;
        }
        subs.push(kind.to_owned());
    }

    pub(crate) fn remove_subscription(&self, kind: &str) {
        self.subscriptions.write().unwrap().retain(|t| t != kind);
    }

    /// Write raw bytes to the channel's sink
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        self.sink.write(data)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
