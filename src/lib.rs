//! Session/channel multiplexer for full-duplex JSON message transports
//!
//! The [`mux`] module is the core: it groups connections that share one
//! end-user identity into sessions, tracks per-channel subscriptions to
//! typed message streams, and fans envelopes out to write sinks. The other
//! modules are collaborators built on its handler and hook seams:
//!
//! - [`room`] broadcasts 2-D presence updates between sessions
//! - [`bridge`] mirrors chat traffic to and from an external platform
//! - [`activity`] pushes editor activity snapshots to subscribers
//! - [`sim`] drives randomized traffic as a property harness
//!
//! The transport itself (socket upgrades, auth, framing) is out of scope:
//! a transport feeds `(session_id, channel_id, bytes)` tuples into
//! [`Mux::message`] and gives each connection a [`WriteSink`] for the
//! return path.

pub mod activity;
pub mod bridge;
pub mod error;
pub mod id;
pub mod mux;
pub mod room;
pub mod sim;

pub use error::{MuxError, Result};
pub use id::{Id, IdSource};
pub use mux::{
    Channel, Envelope, Handler, MessageType, Mux, NullSink, QueueSink, Session, WriteSink,
    MAX_MESSAGE_TYPE_LEN, MESSAGE_SIZE_LIMIT,
};
