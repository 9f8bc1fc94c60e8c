//! Session/channel multiplexer
//!
//! Fans typed JSON envelopes between many full-duplex client connections
//! and a set of server-side handlers. Connections sharing one end-user
//! identity (the transport's session ID) group into a [`Session`]; each
//! connection is a [`Channel`] within it. Channels subscribe to message
//! types through the in-band `mux:subscribe` control plane; handlers
//! publish back to one channel, one session, or all subscribers.

pub mod channel;
pub mod envelope;
pub mod hooks;
pub mod session;
pub mod store;

pub use channel::{Channel, NullSink, QueueSink, WriteSink};
pub use envelope::{
    Envelope, MessageType, SubscribeRequest, CONTROL_PREFIX, MAX_MESSAGE_TYPE_LEN,
    MESSAGE_SIZE_LIMIT,
};
pub use hooks::{ConnectHook, DisconnectHook, MessageHook, SubscriptionHook};
pub use session::Session;
pub use store::{Handler, Mux};
