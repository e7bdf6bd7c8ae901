//! Store seams and failure isolation for the TileMUD realtime core.
//!
//! This crate owns everything that touches external state:
//!
//! 1. **KV seam** ([`KvStore`], [`MemoryKvStore`]) — rate-limit windows,
//!    reconnect grace sessions, reconnect tokens.
//! 2. **Durable seam** ([`DurableStore`], [`MemoryDurableStore`]) —
//!    character profiles and the append-only action event log.
//! 3. **Failure isolation** — the [`DbOutageGuard`] circuit breaker and
//!    the [`DegradedSignalService`] hysteresis tracker that turns guard
//!    samples into client-visible degraded/recovered notices.
//! 4. **Admission control** — the KV-backed sliding-window
//!    [`RateLimiter`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Session / Room layers (above)  ← consume the services here
//!     ↕
//! Store layer (this crate)       ← guards and namespaces external state
//!     ↕
//! Redis / Postgres (outside)     ← reached through the trait seams
//! ```

#![allow(async_fn_in_trait)]

pub mod clock;
mod durability;
mod durable;
mod error;
mod guard;
mod health;
mod kv;
mod ratelimit;

pub use durability::{
    ActionDurabilityService, PersistedAction, metadata_for,
};
pub use durable::{
    ActionEvent, CharacterProfile, DurableStore, InsertOutcome,
    MemoryDurableStore, NewActionEvent,
};
pub use error::StoreError;
pub use guard::{DbOutageGuard, GuardConfig};
pub use health::{
    DegradedSignalService, DependencyStatus, HealthConfig, HealthTransition,
};
pub use kv::{KvStore, MemoryKvStore};
pub use ratelimit::{
    CHANNEL_CHAT_IN_INSTANCE, CHANNEL_PRIVATE_MESSAGE, CHANNEL_TILE_ACTION,
    RateLimitConfig, RateLimitDecision, RateLimitWindow, RateLimiter,
};
