//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating wire
/// messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning an envelope into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing fields, or an
    /// unknown `type` tag.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but violates a payload bound (magnitude range,
    /// chat length, negative sequence, ...).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
