//! Opaque 128-bit identifiers for sessions and channels
//!
//! Session IDs originate from the transport layer (typically a hash of the
//! user's cookie); channel IDs come from the mux's own [`IdSource`]. Both are
//! compared bitwise and printed as lowercase hex.

use std::str::FromStr;
use std::sync::Mutex;

use data_encoding::HEXLOWER;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An opaque 128-bit identifier
///
/// The all-zero value is reserved as "unset" ([`Id::UNSET`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id([u8; 16]);

impl Id {
    /// The reserved "unset" identifier
    pub const UNSET: Id = Id([0; 16]);

    /// Create an ID from raw bytes
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Id(bytes)
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Whether this is the reserved all-zero value
    pub fn is_unset(&self) -> bool {
        *self == Id::UNSET
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&HEXLOWER.encode(&self.0))
    }
}

impl FromStr for Id {
    type Err = data_encoding::DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let decoded = HEXLOWER.decode(s.as_bytes())?;
        let bytes: [u8; 16] = decoded.try_into().map_err(|_| data_encoding::DecodeError {
            position: 0,
            kind: data_encoding::DecodeKind::Length,
        })?;
        Ok(Id(bytes))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Seed for the channel ID generator. Fixed so that ID sequences are
/// reproducible run-to-run; the IDs are opaque handles, not secrets.
const ID_SEED: [u8; 32] = [
    0x9c, 0x1f, 0x5d, 0x88, 0x3a, 0xe2, 0x07, 0x41, 0xb6, 0x2c, 0xd9, 0x70, 0x15, 0xfa, 0x4e,
    0x83, 0x61, 0x0b, 0xc7, 0x2e, 0x94, 0x58, 0xd3, 0x1a, 0x7f, 0xe6, 0x39, 0xa2, 0x0d, 0xc1,
    0x56, 0xb8,
];

/// Deterministic generator of fresh channel IDs
///
/// Not cryptographic. Collisions across 128 bits are treated as negligible;
/// callers do not retry. Concurrent calls are permitted and the resulting
/// sequence is unordered, which callers tolerate.
pub struct IdSource {
    rng: Mutex<StdRng>,
}

impl IdSource {
    /// Create a source seeded with the fixed constant
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_seed(ID_SEED)),
        }
    }

    /// Produce the next 16-byte ID
    pub fn next_id(&self) -> Id {
        let mut bytes = [0u8; 16];
        self.rng.lock().unwrap().fill_bytes(&mut bytes);
        Id(bytes)
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_roundtrip() {
        let id = Id::from_bytes([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ]);
        let hex = id.to_string();
        assert_eq!(hex, "000102030405060708090a0b0c0d0e0f");
        assert_eq!(hex.parse::<Id>().unwrap(), id);
    }

    #[test]
    fn test_unset_is_all_zero() {
        assert!(Id::UNSET.is_unset());
        assert_eq!(Id::UNSET.as_bytes(), &[0u8; 16]);
        assert!(!Id::from_bytes([1; 16]).is_unset());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = Id::from_bytes([0xab; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abababababababababababababababab\"");
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_source_is_deterministic() {
        let a = IdSource::new();
        let b = IdSource::new();
        for _ in 0..16 {
            assert_eq!(a.next_id(), b.next_id());
        }
    }

    #[test]
    fn test_source_does_not_repeat() {
        let source = IdSource::new();
        let first = source.next_id();
        let second = source.next_id();
        assert_ne!(first, second);
        assert!(!first.is_unset());
    }
}
