//! Bounded action queue with deterministic drain order.
//!
//! Admission enforces dedup (hard by action id, soft by dedupe key),
//! capacity, and, for tile placements, the KV-backed rate limit.
//! Internal storage order is irrelevant: `peek`/`drain_batch` sort by the
//! total-order comparator, so draining is deterministic regardless of
//! arrival interleaving.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use tilemud_store::{CHANNEL_TILE_ACTION, KvStore, RateLimiter};

use crate::RoomError;

/// Priority tier assigned to tile placements: they always rank after any
/// explicitly tiered scripted/NPC event in the same drain.
pub const TILE_PRIORITY_SENTINEL: i32 = i32::MAX;

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 512;

/// Category of a queued action. Rank order within a priority tier:
/// scripted events, then NPC events, then tile placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionCategory {
    ScriptedEvent,
    NpcEvent,
    TilePlacement,
}

/// The four-level ordering descriptor attached to every queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub priority_tier: i32,
    pub category: ActionCategory,
    /// Lower drains earlier. Tile placements use `-initiative` so higher
    /// initiative goes first.
    pub initiative_rank: i64,
    pub timestamp: u64,
}

/// One queued action. `payload` is opaque to the queue.
#[derive(Debug, Clone)]
pub struct QueuedAction {
    pub id: String,
    /// The acting player, used as the rate-limit subject for tile
    /// placements.
    pub player_id: Option<String>,
    pub dedupe_key: Option<String>,
    pub descriptor: ActionDescriptor,
    pub payload: serde_json::Value,
}

impl QueuedAction {
    /// A player tile placement: sentinel tier, initiative-ranked.
    pub fn tile_placement(
        id: impl Into<String>,
        player_id: impl Into<String>,
        initiative: i64,
        timestamp: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            player_id: Some(player_id.into()),
            dedupe_key: None,
            descriptor: ActionDescriptor {
                priority_tier: TILE_PRIORITY_SENTINEL,
                category: ActionCategory::TilePlacement,
                initiative_rank: -initiative,
                timestamp,
            },
            payload,
        }
    }

    /// A scripted world event at an explicit tier.
    pub fn scripted_event(
        id: impl Into<String>,
        priority_tier: i32,
        timestamp: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            player_id: None,
            dedupe_key: None,
            descriptor: ActionDescriptor {
                priority_tier,
                category: ActionCategory::ScriptedEvent,
                initiative_rank: 0,
                timestamp,
            },
            payload,
        }
    }

    /// An NPC event at an explicit tier.
    pub fn npc_event(
        id: impl Into<String>,
        priority_tier: i32,
        timestamp: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            player_id: None,
            dedupe_key: None,
            descriptor: ActionDescriptor {
                priority_tier,
                category: ActionCategory::NpcEvent,
                initiative_rank: 0,
                timestamp,
            },
            payload,
        }
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// Total order over queued actions: tier, category, initiative,
/// timestamp, then id as the final tie-break.
pub fn compare_actions(a: &QueuedAction, b: &QueuedAction) -> Ordering {
    a.descriptor
        .priority_tier
        .cmp(&b.descriptor.priority_tier)
        .then(a.descriptor.category.cmp(&b.descriptor.category))
        .then(a.descriptor.initiative_rank.cmp(&b.descriptor.initiative_rank))
        .then(a.descriptor.timestamp.cmp(&b.descriptor.timestamp))
        .then_with(|| a.id.cmp(&b.id))
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Matched an existing `dedupe_key`; dropped without error.
    Duplicate,
}

#[derive(Default)]
struct PipelineInner {
    actions: Vec<QueuedAction>,
    ids: HashSet<String>,
    dedupe_keys: HashSet<String>,
}

/// The bounded, deduplicating action queue.
pub struct ActionPipeline<K: KvStore> {
    inner: Mutex<PipelineInner>,
    rate_limiter: Arc<RateLimiter<K>>,
    max_queue_size: usize,
}

impl<K: KvStore> ActionPipeline<K> {
    pub fn new(
        rate_limiter: Arc<RateLimiter<K>>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(PipelineInner::default()),
            rate_limiter,
            max_queue_size,
        }
    }

    /// Admits an action. The mutex is held for the whole admission,
    /// including the tile-action rate check, so concurrent enqueues are
    /// serialized.
    pub async fn enqueue(
        &self,
        action: QueuedAction,
    ) -> Result<EnqueueOutcome, RoomError> {
        let mut inner = self.inner.lock().await;

        if inner.ids.contains(&action.id) {
            return Err(RoomError::DuplicateAction(action.id));
        }
        if let Some(key) = &action.dedupe_key {
            if inner.dedupe_keys.contains(key) {
                tracing::debug!(
                    action_id = %action.id,
                    dedupe_key = %key,
                    "action deduplicated"
                );
                return Ok(EnqueueOutcome::Duplicate);
            }
        }
        if inner.actions.len() >= self.max_queue_size {
            return Err(RoomError::QueueFull);
        }

        if action.descriptor.category == ActionCategory::TilePlacement {
            let subject = action.player_id.as_deref().unwrap_or("anonymous");
            self.rate_limiter
                .enforce(CHANNEL_TILE_ACTION, subject)
                .await?;
        }

        inner.ids.insert(action.id.clone());
        if let Some(key) = &action.dedupe_key {
            inner.dedupe_keys.insert(key.clone());
        }
        inner.actions.push(action);
        Ok(EnqueueOutcome::Enqueued)
    }

    /// The top `limit` actions in drain order, without mutation.
    pub async fn peek(&self, limit: usize) -> Vec<QueuedAction> {
        let inner = self.inner.lock().await;
        let mut sorted = inner.actions.clone();
        sorted.sort_by(compare_actions);
        sorted.truncate(limit);
        sorted
    }

    /// Removes and returns the top `limit` actions in drain order.
    pub async fn drain_batch(&self, limit: usize) -> Vec<QueuedAction> {
        let mut inner = self.inner.lock().await;
        inner.actions.sort_by(compare_actions);
        let take = limit.min(inner.actions.len());
        let drained: Vec<QueuedAction> =
            inner.actions.drain(..take).collect();
        for action in &drained {
            inner.ids.remove(&action.id);
            if let Some(key) = &action.dedupe_key {
                inner.dedupe_keys.remove(key);
            }
        }
        drained
    }

    /// Removes every action matching `pred`; returns how many went.
    pub async fn remove_where(
        &self,
        pred: impl Fn(&QueuedAction) -> bool,
    ) -> usize {
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        let mut kept = Vec::with_capacity(inner.actions.len());
        let taken: Vec<QueuedAction> = inner.actions.drain(..).collect();
        for action in taken {
            if pred(&action) {
                inner.ids.remove(&action.id);
                if let Some(key) = &action.dedupe_key {
                    inner.dedupe_keys.remove(key);
                }
                removed += 1;
            } else {
                kept.push(action);
            }
        }
        inner.actions = kept;
        removed
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.actions.clear();
        inner.ids.clear();
        inner.dedupe_keys.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.actions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.actions.is_empty()
    }
}
