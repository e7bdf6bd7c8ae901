//! Unified error type for the server facade.

use tilemud_protocol::ProtocolError;
use tilemud_room::RoomError;
use tilemud_session::SessionError;
use tilemud_store::StoreError;
use tilemud_transport::TransportError;

/// Top-level error wrapping every layer's failures.
///
/// The facade deals in this single type; the `#[from]` conversions let
/// `?` lift sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configured protocol version did not parse.
    #[error("invalid protocol version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
