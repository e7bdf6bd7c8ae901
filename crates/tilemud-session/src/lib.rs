//! Player session management for the TileMUD realtime core.
//!
//! This crate owns identity and continuity:
//!
//! 1. **Session registry** ([`SessionStore`]) — the in-process map of
//!    live sessions and their lifecycle transitions.
//! 2. **Bootstrap** ([`SessionBootstrapService`]) — bearer token in,
//!    open session + reconnect token out.
//! 3. **Continuity** ([`ReconnectTokenStore`], [`ReconnectFlowService`])
//!    — single-use tokens and the delta-or-snapshot resume decision.
//! 4. **Sequencing** ([`ActionSequenceService`]) — per-session monotonic
//!    intent ordering with pending-snapshot scheduling.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room layer (above)     ← binds sessions to live sockets
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Store layer (below)    ← KV for tokens, durable log for replay
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod bootstrap;
mod error;
mod profiles;
mod reconnect;
mod sequence;
mod session;
mod store;
mod tokens;

pub use auth::{DevTokenValidator, TokenValidator};
pub use bootstrap::{
    BootstrapRequest, BootstrapResponse, BootstrapState, RealtimeInfo,
    SessionBootstrapService, SessionSummary,
};
pub use error::SessionError;
pub use profiles::{ProfileService, fallback_snapshot, snapshot_of};
pub use reconnect::{
    DEFAULT_DELTA_WINDOW, DeltaReplay, ReconnectFlowService,
    ReconnectRequest, ReconnectResponse, ReplayMode,
};
pub use sequence::{
    ActionSequenceService, DEFAULT_PENDING_SNAPSHOT_TTL_MS,
    SequenceEvaluation, SnapshotRequest,
};
pub use session::{NewSession, Session, SessionStatus};
pub use store::SessionStore;
pub use tokens::{
    DEFAULT_TOKEN_TTL_SECONDS, ReconnectTokenPayload, ReconnectTokenStore,
};
