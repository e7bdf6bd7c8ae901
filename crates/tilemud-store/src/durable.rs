//! Durable store seam: character profiles and the append-only action
//! event log.
//!
//! The core relies on exactly this contract: profile get/upsert, and
//! action events that are unique per `(session, sequence)`, queryable by
//! session and by character recency. Schema and migrations live with the
//! backing store (Postgres in production); [`MemoryDurableStore`] is the
//! in-process implementation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use tilemud_protocol::{
    ActionEventId, ActionKind, CharacterId, JsonMap, Position, SessionId,
    UserId,
};

use crate::StoreError;
use crate::clock::now_ms;

/// A character's durable profile. The session holds a working copy that
/// applied intents mutate; this is the stored original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub character_id: CharacterId,
    pub user_id: UserId,
    pub display_name: String,
    pub position: Position,
    #[serde(default)]
    pub stats: JsonMap,
    #[serde(default)]
    pub inventory: JsonMap,
}

impl CharacterProfile {
    /// The profile created lazily on first bootstrap.
    pub fn default_for(character_id: CharacterId, user_id: UserId) -> Self {
        let short: String =
            character_id.as_str().chars().take(8).collect();
        let display_name = format!("wanderer-{short}");
        Self {
            character_id,
            user_id,
            display_name,
            position: Position::ORIGIN,
            stats: JsonMap::new(),
            inventory: JsonMap::new(),
        }
    }
}

/// One persisted action event. Append-only: never mutated or deleted by
/// the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEvent {
    pub action_event_id: ActionEventId,
    pub session_id: SessionId,
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub sequence_number: i64,
    pub action_type: ActionKind,
    pub payload: serde_json::Value,
    pub persisted_at: u64,
}

/// The fields a caller supplies when persisting an action.
#[derive(Debug, Clone)]
pub struct NewActionEvent {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub sequence_number: i64,
    pub action_type: ActionKind,
    pub payload: serde_json::Value,
}

/// Result of an insert attempt.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// Freshly written.
    Inserted(ActionEvent),
    /// `(session, sequence)` already existed; the stored row is returned.
    Duplicate(ActionEvent),
}

/// The durable read/write contract the core consumes.
pub trait DurableStore: Send + Sync + 'static {
    fn get_profile(
        &self,
        character_id: &CharacterId,
    ) -> impl Future<Output = Result<Option<CharacterProfile>, StoreError>> + Send;

    fn upsert_profile(
        &self,
        profile: CharacterProfile,
    ) -> impl Future<Output = Result<CharacterProfile, StoreError>> + Send;

    /// Inserts one action event; a `(session, sequence)` collision is not
    /// an error, it reports the existing row.
    fn insert_action_event(
        &self,
        event: NewActionEvent,
    ) -> impl Future<Output = Result<InsertOutcome, StoreError>> + Send;

    fn action_event_by_sequence(
        &self,
        session_id: &SessionId,
        sequence: i64,
    ) -> impl Future<Output = Result<Option<ActionEvent>, StoreError>> + Send;

    fn latest_action_event(
        &self,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<Option<ActionEvent>, StoreError>> + Send;

    /// The most recent `limit` events for a character, returned ascending
    /// by sequence number.
    fn recent_action_events(
        &self,
        character_id: &CharacterId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ActionEvent>, StoreError>> + Send;
}

#[derive(Default)]
struct DurableInner {
    profiles: HashMap<CharacterId, CharacterProfile>,
    events: Vec<ActionEvent>,
    by_session_seq: HashMap<(SessionId, i64), usize>,
}

/// In-process [`DurableStore`].
#[derive(Default)]
pub struct MemoryDurableStore {
    inner: Mutex<DurableInner>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryDurableStore {
    async fn get_profile(
        &self,
        character_id: &CharacterId,
    ) -> Result<Option<CharacterProfile>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.profiles.get(character_id).cloned())
    }

    async fn upsert_profile(
        &self,
        profile: CharacterProfile,
    ) -> Result<CharacterProfile, StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .profiles
            .insert(profile.character_id.clone(), profile.clone());
        Ok(profile)
    }

    async fn insert_action_event(
        &self,
        event: NewActionEvent,
    ) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (event.session_id.clone(), event.sequence_number);
        if let Some(&idx) = inner.by_session_seq.get(&key) {
            return Ok(InsertOutcome::Duplicate(inner.events[idx].clone()));
        }
        let record = ActionEvent {
            action_event_id: ActionEventId::generate(),
            session_id: event.session_id,
            user_id: event.user_id,
            character_id: event.character_id,
            sequence_number: event.sequence_number,
            action_type: event.action_type,
            payload: event.payload,
            persisted_at: now_ms(),
        };
        inner.events.push(record.clone());
        let idx = inner.events.len() - 1;
        inner.by_session_seq.insert(key, idx);
        Ok(InsertOutcome::Inserted(record))
    }

    async fn action_event_by_sequence(
        &self,
        session_id: &SessionId,
        sequence: i64,
    ) -> Result<Option<ActionEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_session_seq
            .get(&(session_id.clone(), sequence))
            .map(|&idx| inner.events[idx].clone()))
    }

    async fn latest_action_event(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ActionEvent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| &e.session_id == session_id)
            .max_by_key(|e| e.sequence_number)
            .cloned())
    }

    async fn recent_action_events(
        &self,
        character_id: &CharacterId,
        limit: usize,
    ) -> Result<Vec<ActionEvent>, StoreError> {
        let inner = self.inner.lock().await;
        let mut events: Vec<ActionEvent> = inner
            .events
            .iter()
            .filter(|e| &e.character_id == character_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence_number);
        if events.len() > limit {
            events.drain(..events.len() - limit);
        }
        Ok(events)
    }
}
