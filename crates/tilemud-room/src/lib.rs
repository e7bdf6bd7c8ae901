//! Realtime room hosting for the TileMUD core.
//!
//! This crate turns validated client traffic into game state:
//!
//! 1. **Room actor** ([`spawn_room`], [`RoomHandle`]) — one task per
//!    instance owning the connected-player map, join handshake, version
//!    gating, fanout, and degraded-signal broadcast.
//! 2. **Intent processor** ([`IntentProcessor`]) — sequence gate →
//!    durable persist → state mutation → ack/error.
//! 3. **Action pipeline** ([`ActionPipeline`]) — bounded, deduplicating
//!    queue with a deterministic drain comparator.
//! 4. **Grace manager** ([`ReconnectSessionManager`]) — KV-parked player
//!    state for in-room resume after an unexpected disconnect.

mod config;
mod error;
mod grace;
mod intents;
mod pipeline;
mod room;

pub use config::RoomConfig;
pub use error::RoomError;
pub use grace::{
    DEFAULT_GRACE_MS, GRACE_EXTENDED_MS, GRACE_QUICK_MS,
    GRACE_STANDARD_MS, GraceSession, GraceStats, ReconnectAttempt,
    ReconnectSessionManager,
};
pub use intents::{
    CHAT_WINDOW_LIMIT, CHAT_WINDOW_MS, ChatWindow, IntentOutcome,
    IntentProcessor, PlayerState,
};
pub use pipeline::{
    ActionCategory, ActionDescriptor, ActionPipeline,
    DEFAULT_MAX_QUEUE_SIZE, EnqueueOutcome, QueuedAction,
    TILE_PRIORITY_SENTINEL, compare_actions,
};
pub use room::{
    JoinAccepted, JoinOutcome, JoinRejection, PlayerSender, RoomHandle,
    RoomInfo, RoomServices, spawn_room,
};
