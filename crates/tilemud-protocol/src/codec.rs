//! Wire codec: converts envelopes to and from bytes.
//!
//! The transport hands this layer raw frames; the codec produces typed
//! envelopes (or a decode error the caller turns into a protocol error
//! event). JSON is the wire format the TileMUD client speaks.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;
use crate::types::{EventEnvelope, IntentEnvelope, RoomJoinRequest};

/// Encodes outbound events and decodes inbound client frames.
pub trait Codec: Send + Sync + 'static {
    /// Serializes an outbound event envelope.
    fn encode_event(
        &self,
        event: &EventEnvelope,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Decodes an inbound intent envelope. Fails on unknown `type` tags.
    fn decode_intent(
        &self,
        data: &[u8],
    ) -> Result<IntentEnvelope, ProtocolError>;

    /// Decodes the join payload a client sends as its first frame.
    fn decode_join(
        &self,
        data: &[u8],
    ) -> Result<RoomJoinRequest, ProtocolError>;
}

/// JSON [`Codec`] via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

impl Codec for JsonCodec {
    fn encode_event(
        &self,
        event: &EventEnvelope,
    ) -> Result<Vec<u8>, ProtocolError> {
        Self::encode(event)
    }

    fn decode_intent(
        &self,
        data: &[u8],
    ) -> Result<IntentEnvelope, ProtocolError> {
        Self::decode(data)
    }

    fn decode_join(
        &self,
        data: &[u8],
    ) -> Result<RoomJoinRequest, ProtocolError> {
        Self::decode(data)
    }
}
