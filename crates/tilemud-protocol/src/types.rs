//! Core wire types for the realtime protocol.
//!
//! Everything here travels on the WebSocket as JSON. Both directions use
//! discriminated unions on a `type` field with the payload nested under
//! `payload`:
//!
//! ```text
//! { "type": "intent.move", "payload": { "sequence": 1, "direction": "east", ... } }
//! { "type": "event.ack",   "payload": { "intentType": "intent.move", ... } }
//! ```
//!
//! Unknown `type` tags fail decoding. Bounds that serde cannot express
//! (magnitude range, chat length) are enforced by [`IntentEnvelope::validate`]
//! after decode.

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogError, ErrorCategory};
use crate::ids::{CharacterId, SessionId, UserId};

/// Opaque JSON object used for metadata, stats, and inventory blobs.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// WebSocket close code for auth/identity failures during join.
pub const CLOSE_AUTH_FAILURE: u16 = 4401;
/// WebSocket close code for protocol version incompatibility.
pub const CLOSE_VERSION_MISMATCH: u16 = 4408;
/// WebSocket close code for a consented leave.
pub const CLOSE_NORMAL: u16 = 1000;

// ---------------------------------------------------------------------------
// Spatial primitives
// ---------------------------------------------------------------------------

/// A tile-grid position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// The position reached by moving `magnitude` tiles in `direction`.
    pub fn step(self, direction: Direction, magnitude: i64) -> Self {
        let (dx, dy) = direction.unit_vector();
        Self {
            x: self.x + dx * magnitude,
            y: self.y + dy * magnitude,
        }
    }
}

/// A cardinal movement direction. North decreases `y` (grid convention).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Unit vector for one tile of movement in this direction.
    pub fn unit_vector(self) -> (i64, i64) {
        match self {
            Self::North => (0, -1),
            Self::South => (0, 1),
            Self::East => (1, 0),
            Self::West => (-1, 0),
        }
    }
}

// ---------------------------------------------------------------------------
// Intents (client → server)
// ---------------------------------------------------------------------------

/// Bounds enforced on inbound intents.
pub mod bounds {
    pub const MAGNITUDE_MIN: u32 = 1;
    pub const MAGNITUDE_MAX: u32 = 3;
    pub const CHAT_CHANNEL_MIN: usize = 1;
    pub const CHAT_CHANNEL_MAX: usize = 32;
    pub const CHAT_MESSAGE_MIN: usize = 1;
    pub const CHAT_MESSAGE_MAX: usize = 280;
    pub const LOCALE_MIN: usize = 2;
    pub const LOCALE_MAX: usize = 8;
}

/// The durable classification of an action event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Move,
    Chat,
    Ability,
    #[default]
    System,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Chat => "chat",
            Self::Ability => "ability",
            Self::System => "system",
        }
    }
}

/// A movement intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveIntent {
    pub sequence: i64,
    pub direction: Direction,
    pub magnitude: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

/// A chat intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIntent {
    pub sequence: i64,
    pub channel: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// Target descriptor for a generic action. Open-ended: unknown fields are
/// preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionTarget {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

/// A generic game action intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionIntent {
    pub sequence: i64,
    pub action_id: String,
    #[serde(default)]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActionTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

/// Every inbound intent, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum IntentEnvelope {
    #[serde(rename = "intent.move")]
    Move(MoveIntent),
    #[serde(rename = "intent.chat")]
    Chat(ChatIntent),
    #[serde(rename = "intent.action")]
    Action(ActionIntent),
}

impl IntentEnvelope {
    /// The wire tag for this intent (`intent.move`, ...).
    pub fn intent_type(&self) -> &'static str {
        match self {
            Self::Move(_) => "intent.move",
            Self::Chat(_) => "intent.chat",
            Self::Action(_) => "intent.action",
        }
    }

    /// The sequence number this intent carries.
    pub fn sequence(&self) -> i64 {
        match self {
            Self::Move(m) => m.sequence,
            Self::Chat(c) => c.sequence,
            Self::Action(a) => a.sequence,
        }
    }

    /// Enforces payload bounds the type system cannot.
    ///
    /// Returns the first violation as a human-readable description.
    pub fn validate(&self) -> Result<(), String> {
        if self.sequence() < 0 {
            return Err(format!(
                "sequence must be non-negative, got {}",
                self.sequence()
            ));
        }
        match self {
            Self::Move(m) => {
                if !(bounds::MAGNITUDE_MIN..=bounds::MAGNITUDE_MAX)
                    .contains(&m.magnitude)
                {
                    return Err(format!(
                        "magnitude must be in [{}..{}], got {}",
                        bounds::MAGNITUDE_MIN,
                        bounds::MAGNITUDE_MAX,
                        m.magnitude
                    ));
                }
            }
            Self::Chat(c) => {
                let channel_len = c.channel.chars().count();
                if !(bounds::CHAT_CHANNEL_MIN..=bounds::CHAT_CHANNEL_MAX)
                    .contains(&channel_len)
                {
                    return Err(format!(
                        "channel length must be in [{}..{}], got {}",
                        bounds::CHAT_CHANNEL_MIN,
                        bounds::CHAT_CHANNEL_MAX,
                        channel_len
                    ));
                }
                let message_len = c.message.chars().count();
                if !(bounds::CHAT_MESSAGE_MIN..=bounds::CHAT_MESSAGE_MAX)
                    .contains(&message_len)
                {
                    return Err(format!(
                        "message length must be in [{}..{}], got {}",
                        bounds::CHAT_MESSAGE_MIN,
                        bounds::CHAT_MESSAGE_MAX,
                        message_len
                    ));
                }
                if let Some(locale) = &c.locale {
                    let len = locale.chars().count();
                    if !(bounds::LOCALE_MIN..=bounds::LOCALE_MAX)
                        .contains(&len)
                    {
                        return Err(format!(
                            "locale length must be in [{}..{}], got {len}",
                            bounds::LOCALE_MIN,
                            bounds::LOCALE_MAX,
                        ));
                    }
                }
            }
            Self::Action(a) => {
                if a.action_id.is_empty() {
                    return Err("actionId must not be empty".into());
                }
            }
        }
        Ok(())
    }
}

/// First frame a client sends after the socket opens: binds the socket to
/// an existing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence_number: Option<i64>,
}

// ---------------------------------------------------------------------------
// Events (server → client)
// ---------------------------------------------------------------------------

/// Durability metadata attached to intent acks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurabilityMetadata {
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persisted_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

/// Outcome of an intent as reported in its ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Applied,
    Duplicate,
    Rejected,
    Queued,
}

/// The join-handshake ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    /// Always the literal `"handshake"`.
    pub reason: String,
    pub session_id: SessionId,
    pub sequence: i64,
    pub version: String,
    pub acknowledged_intents: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<u64>,
}

impl HandshakeAck {
    pub fn new(
        session_id: SessionId,
        sequence: i64,
        version: impl Into<String>,
        acknowledged_at: u64,
    ) -> Self {
        Self {
            reason: "handshake".into(),
            session_id,
            sequence,
            version: version.into(),
            acknowledged_intents: Vec::new(),
            acknowledged_at: Some(acknowledged_at),
        }
    }
}

/// Ack for a processed intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentAck {
    pub intent_type: String,
    pub sequence: i64,
    pub status: AckStatus,
    pub acknowledged_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durability: Option<DurabilityMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `event.ack` payload: either the join handshake or an intent ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AckPayload {
    Handshake(HandshakeAck),
    Intent(IntentAck),
}

/// A reconnect token reference handed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectTokenRef {
    pub token: String,
    pub expires_at: u64,
}

/// The character view shipped in state deltas and snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSnapshot {
    pub character_id: CharacterId,
    pub display_name: String,
    pub position: Position,
    #[serde(default)]
    pub stats: JsonMap,
    #[serde(default)]
    pub inventory: JsonMap,
}

/// The world view shipped in snapshots. Tiles are opaque to this layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    pub tiles: Vec<serde_json::Value>,
}

/// One applied effect inside a state delta.
///
/// `target` is shape-polymorphic: a [`Position`] for movement, an
/// [`ActionTarget`] for generic actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Effect {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

impl Effect {
    /// A movement effect.
    pub fn movement(
        action_id: impl Into<String>,
        origin: Position,
        target: Position,
        direction: Direction,
        magnitude: u32,
    ) -> Self {
        Self {
            kind: "movement".into(),
            action_id: Some(action_id.into()),
            origin: Some(origin),
            target: serde_json::to_value(target).ok(),
            direction: Some(direction),
            magnitude: Some(magnitude),
            metadata: None,
        }
    }

    /// A generic action effect typed by the action's kind.
    pub fn action(
        kind: ActionKind,
        action_id: impl Into<String>,
        target: Option<&ActionTarget>,
        metadata: Option<JsonMap>,
    ) -> Self {
        Self {
            kind: kind.as_str().into(),
            action_id: Some(action_id.into()),
            origin: None,
            target: target.and_then(|t| serde_json::to_value(t).ok()),
            direction: None,
            magnitude: None,
            metadata,
        }
    }
}

/// `event.state_delta` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDeltaPayload {
    pub sequence: i64,
    pub issued_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<CharacterSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world: Option<WorldSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<Effect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_token: Option<ReconnectTokenRef>,
}

/// `event.error` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    pub code: String,
    pub category: ErrorCategory,
    pub retryable: bool,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(
        code: impl Into<String>,
        category: ErrorCategory,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            intent_type: None,
            sequence: None,
            code: code.into(),
            category,
            retryable,
            message: message.into(),
        }
    }

    /// Builds a wire error from a catalog error: code is the symbolic
    /// reason uppercased, category per the catalog mapping.
    pub fn from_catalog(err: &CatalogError) -> Self {
        Self::new(
            err.reason().to_uppercase(),
            err.wire_category(),
            err.retryable(),
            err.message(),
        )
    }

    pub fn for_intent(
        mut self,
        intent_type: impl Into<String>,
        sequence: i64,
    ) -> Self {
        self.intent_type = Some(intent_type.into());
        self.sequence = Some(sequence);
        self
    }
}

/// A backing dependency visible to clients in degraded-mode notices.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Dependency {
    Redis,
    Postgres,
    Metrics,
    Unknown,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Redis => "redis",
            Self::Postgres => "postgres",
            Self::Metrics => "metrics",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Direction of a degraded-signal transition as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegradedStatus {
    Degraded,
    Recovered,
}

/// `event.degraded` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedPayload {
    pub dependency: Dependency,
    pub status: DegradedStatus,
    pub observed_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `event.version_mismatch` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMismatchPayload {
    pub expected_version: String,
    pub received_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `event.disconnect` payload: mirrors the socket close that follows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPayload {
    pub code: u16,
    pub reason: String,
}

/// Every outbound event, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventEnvelope {
    #[serde(rename = "event.ack")]
    Ack(AckPayload),
    #[serde(rename = "event.state_delta")]
    StateDelta(StateDeltaPayload),
    #[serde(rename = "event.error")]
    Error(ErrorPayload),
    #[serde(rename = "event.degraded")]
    Degraded(DegradedPayload),
    #[serde(rename = "event.version_mismatch")]
    VersionMismatch(VersionMismatchPayload),
    #[serde(rename = "event.disconnect")]
    Disconnect(DisconnectPayload),
}

// =========================================================================
// Tests
// =========================================================================
