//! Wire envelope and control-plane payloads
//!
//! Every message on the wire is a single JSON object `{"type": ..,
//! "payload": ..}`. Types starting with `mux:` are reserved for the control
//! plane; everything else is routed to a registered handler.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Maximum combined size of an envelope and its payload, in bytes
pub const MESSAGE_SIZE_LIMIT: usize = 65_535;

/// Maximum length of a message type string, in bytes
pub const MAX_MESSAGE_TYPE_LEN: usize = 16;

/// Prefix reserving a message type for the control plane
pub const CONTROL_PREFIX: &str = "mux:";

pub(crate) const SUBSCRIBE_ACTION: &str = "subscribe";
pub(crate) const UNSUBSCRIBE_ACTION: &str = "unsubscribe";

/// A short string tag discriminating payload schemas
pub type MessageType = String;

/// The outer `{type, payload}` object on the wire
///
/// The payload is kept as raw JSON and passed through untouched; the mux
/// imposes no schema on it beyond the combined size limit.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag, at most [`MAX_MESSAGE_TYPE_LEN`] bytes
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Raw JSON payload, absent for payload-less messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    /// Borrow the payload bytes, empty when absent
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload
            .as_deref()
            .map(|raw| raw.get().as_bytes())
            .unwrap_or_default()
    }
}

/// Build the wire bytes for an envelope around a raw JSON payload
///
/// The payload is validated as JSON (so a malformed payload surfaces as an
/// encoding error, not garbage on the wire) but otherwise passed through
/// untouched.
pub(crate) fn encode_envelope(kind: &str, payload: &[u8]) -> crate::error::Result<Vec<u8>> {
    #[derive(Serialize)]
    struct WireEnvelope<'a> {
        #[serde(rename = "type")]
        kind: &'a str,
        payload: &'a RawValue,
    }

    let payload: &RawValue =
        serde_json::from_slice(payload).map_err(crate::error::MuxError::Encoding)?;
    serde_json::to_vec(&WireEnvelope { kind, payload }).map_err(crate::error::MuxError::Encoding)
}

/// Payload of a `mux:subscribe` / `mux:unsubscribe` envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// The message type to (un)subscribe the sending channel to
    #[serde(rename = "MessageType")]
    pub message_type: MessageType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope() {
        let env: Envelope = serde_json::from_slice(br#"{"type":"room","payload":{"x":1,"y":2}}"#)
            .expect("valid envelope");
        assert_eq!(env.kind, "room");
        assert_eq!(env.payload_bytes(), br#"{"x":1,"y":2}"#);
    }

    #[test]
    fn test_parse_envelope_without_payload() {
        let env: Envelope = serde_json::from_slice(br#"{"type":"ping"}"#).expect("valid envelope");
        assert_eq!(env.kind, "ping");
        assert!(env.payload_bytes().is_empty());
    }

    #[test]
    fn test_serialize_skips_absent_payload() {
        let env = Envelope {
            kind: "ping".into(),
            payload: None,
        };
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_parse_subscribe_request() {
        let req: SubscribeRequest =
            serde_json::from_slice(br#"{"MessageType":"chat"}"#).expect("valid request");
        assert_eq!(req.message_type, "chat");
    }
}
