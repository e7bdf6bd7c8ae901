//! Wire protocol for the TileMUD realtime core.
//!
//! This crate defines the contract between clients and the server:
//!
//! - **Types** ([`IntentEnvelope`], [`EventEnvelope`], ids, payload
//!   structs) — everything that travels on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — bytes ⇄ envelopes.
//! - **Error catalog** ([`catalog`]) — the fixed registry of numeric
//!   codes and symbolic reasons surfaced to players.
//! - **Version service** ([`VersionService`]) — protocol version
//!   reporting and client compatibility gating.
//!
//! The protocol layer sits between transport (raw frames) and the
//! session/room layers (player context). It knows nothing about
//! connections, sessions, or persistence.

pub mod catalog;
mod codec;
mod error;
mod ids;
mod types;
mod version;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use ids::{ActionEventId, CharacterId, InstanceId, SessionId, UserId};
pub use types::{
    AckPayload, AckStatus, ActionIntent, ActionKind, ActionTarget,
    CLOSE_AUTH_FAILURE, CLOSE_NORMAL, CLOSE_VERSION_MISMATCH, ChatIntent,
    CharacterSnapshot, DegradedPayload, DegradedStatus, Dependency,
    Direction, DisconnectPayload, DurabilityMetadata, Effect,
    ErrorPayload, EventEnvelope, HandshakeAck, IntentAck, IntentEnvelope,
    JsonMap, MoveIntent, Position, ReconnectTokenRef, RoomJoinRequest,
    StateDeltaPayload, VersionMismatchPayload, WorldSnapshot, bounds,
};
pub use version::{VersionCheck, VersionCheckReason, VersionService};
