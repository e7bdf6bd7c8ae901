//! Error types for the room layer.

use tilemud_protocol::{InstanceId, SessionId};
use tilemud_protocol::catalog::CatalogError;
use tilemud_session::SessionError;

/// Errors that can occur during room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The join payload referenced a session the server does not know.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The join payload's user does not own the session.
    #[error("session user mismatch for {0}")]
    SessionUserMismatch(SessionId),

    /// The room is at `max_clients`.
    #[error("room {0} is full")]
    RoomFull(InstanceId),

    /// The session is not currently registered in this room.
    #[error("session {0} not in room")]
    NotInRoom(SessionId),

    /// The room's command channel is closed or saturated.
    #[error("room {0} is unavailable")]
    Unavailable(InstanceId),

    /// An action with this id is already queued.
    #[error("action {0} already queued")]
    DuplicateAction(String),

    /// The action queue is at capacity.
    #[error("action queue full")]
    QueueFull,

    /// A cataloged failure (rate limits, outage guard).
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A session-layer failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}
