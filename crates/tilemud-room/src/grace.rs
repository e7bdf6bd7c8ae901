//! Room-scoped reconnect grace sessions.
//!
//! When a socket drops unexpectedly, the room parks the player's state in
//! the KV store for a bounded grace window. A new socket arriving inside
//! the window resumes that state; once the window lapses the KV TTL (and
//! a lazy expiry check on read) guarantees the record is gone.
//!
//! Distinct from the reconnect token/flow pair: this manager stores the
//! in-room *player-state snapshot*; tokens handle cross-connection
//! session continuity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tilemud_protocol::{InstanceId, JsonMap, SessionId, UserId};
use tilemud_store::clock::now_ms;
use tilemud_store::{KvStore, StoreError};

/// Preset: quick matches (30 s).
pub const GRACE_QUICK_MS: u64 = 30_000;
/// Preset: standard game sessions (5 m).
pub const GRACE_STANDARD_MS: u64 = 300_000;
/// Preset: extended campaigns (15 m).
pub const GRACE_EXTENDED_MS: u64 = 900_000;
/// Default for the core room flow.
pub const DEFAULT_GRACE_MS: u64 = 60_000;

/// A parked player awaiting resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraceSession {
    pub player_id: UserId,
    pub instance_id: InstanceId,
    /// May be replaced on resume.
    pub session_id: SessionId,
    pub disconnected_at: u64,
    pub grace_period_ms: u64,
    /// Opaque snapshot sufficient to resume (position, transient state).
    pub player_state: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonMap>,
}

impl GraceSession {
    pub fn expires_at(&self) -> u64 {
        self.disconnected_at + self.grace_period_ms
    }

    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.expires_at().saturating_sub(now)
    }

    fn expired(&self, now: u64) -> bool {
        now > self.expires_at()
    }
}

/// Secondary index payload: where is this player parked?
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerPointer {
    instance_id: InstanceId,
    session_id: SessionId,
}

/// Result of a resume attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectAttempt {
    /// The grace session was live; it now carries the new session id.
    Resumed(GraceSession),
    /// Absent or expired; the client must bootstrap a fresh session.
    NewSessionRequired { reason: String },
}

/// Aggregate stats over parked sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraceStats {
    pub total: usize,
    pub by_instance: HashMap<InstanceId, usize>,
}

/// Manages grace sessions in the shared KV store.
pub struct ReconnectSessionManager<K: KvStore> {
    kv: Arc<K>,
    default_grace_ms: u64,
}

const SESSION_PREFIX: &str = "reconnect:session:";
const PLAYER_PREFIX: &str = "reconnect:player:";

impl<K: KvStore> ReconnectSessionManager<K> {
    pub fn new(kv: Arc<K>, default_grace_ms: u64) -> Self {
        Self {
            kv,
            default_grace_ms,
        }
    }

    /// Parks a player's state for the grace window.
    pub async fn create_session(
        &self,
        player_id: UserId,
        instance_id: InstanceId,
        session_id: SessionId,
        player_state: JsonMap,
        grace_period_ms: Option<u64>,
        metadata: Option<JsonMap>,
    ) -> Result<GraceSession, StoreError> {
        let session = GraceSession {
            player_id,
            instance_id,
            session_id,
            disconnected_at: now_ms(),
            grace_period_ms: grace_period_ms
                .unwrap_or(self.default_grace_ms),
            player_state,
            metadata,
        };
        self.persist(&session, session.grace_period_ms).await?;
        tracing::info!(
            player_id = %session.player_id,
            instance_id = %session.instance_id,
            grace_period_ms = session.grace_period_ms,
            "grace session created"
        );
        Ok(session)
    }

    /// Fetches a live grace session. Expired or corrupt records are
    /// deleted and read as absent.
    pub async fn get_session(
        &self,
        player_id: &UserId,
        instance_id: &InstanceId,
    ) -> Result<Option<GraceSession>, StoreError> {
        let key = session_key(player_id, instance_id);
        let Some(json) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let session: GraceSession = match serde_json::from_str(&json) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupt grace session");
                self.remove(player_id, instance_id).await?;
                return Ok(None);
            }
        };
        if session.expired(now_ms()) {
            self.remove(player_id, instance_id).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// Resumes within the window, rebinding to `new_session_id`.
    pub async fn attempt_reconnect(
        &self,
        player_id: &UserId,
        instance_id: &InstanceId,
        new_session_id: SessionId,
    ) -> Result<ReconnectAttempt, StoreError> {
        let Some(mut session) =
            self.get_session(player_id, instance_id).await?
        else {
            return Ok(ReconnectAttempt::NewSessionRequired {
                reason: "grace session absent or expired".into(),
            });
        };
        session.session_id = new_session_id;
        let remaining = session.remaining_ms(now_ms());
        self.persist(&session, remaining).await?;
        tracing::info!(
            player_id = %session.player_id,
            instance_id = %session.instance_id,
            remaining_ms = remaining,
            "grace session resumed"
        );
        Ok(ReconnectAttempt::Resumed(session))
    }

    /// Shallow-merges `patch` into the parked player state. Returns
    /// `false` when no live session exists.
    pub async fn update_player_state(
        &self,
        player_id: &UserId,
        instance_id: &InstanceId,
        patch: JsonMap,
    ) -> Result<bool, StoreError> {
        let Some(mut session) =
            self.get_session(player_id, instance_id).await?
        else {
            return Ok(false);
        };
        for (key, value) in patch {
            session.player_state.insert(key, value);
        }
        let remaining = session.remaining_ms(now_ms());
        self.persist(&session, remaining).await?;
        Ok(true)
    }

    /// Adds `additional_ms` to the grace window. Returns `false` when no
    /// live session exists.
    pub async fn extend_grace_period(
        &self,
        player_id: &UserId,
        instance_id: &InstanceId,
        additional_ms: u64,
    ) -> Result<bool, StoreError> {
        let Some(mut session) =
            self.get_session(player_id, instance_id).await?
        else {
            return Ok(false);
        };
        session.grace_period_ms += additional_ms;
        let remaining = session.remaining_ms(now_ms());
        self.persist(&session, remaining).await?;
        Ok(true)
    }

    /// Explicitly cancels a parked session (consented leave, resume
    /// completed).
    pub async fn remove_session(
        &self,
        player_id: &UserId,
        instance_id: &InstanceId,
    ) -> Result<(), StoreError> {
        self.remove(player_id, instance_id).await
    }

    /// Live sessions, optionally filtered to one instance.
    pub async fn list_active_sessions(
        &self,
        instance_id: Option<&InstanceId>,
    ) -> Result<Vec<GraceSession>, StoreError> {
        let keys = self.kv.keys_with_prefix(SESSION_PREFIX).await?;
        let now = now_ms();
        let mut sessions = Vec::new();
        for key in keys {
            let Some(json) = self.kv.get(&key).await? else {
                continue;
            };
            let Ok(session) = serde_json::from_str::<GraceSession>(&json)
            else {
                continue;
            };
            if session.expired(now) {
                continue;
            }
            if instance_id.is_none_or(|id| id == &session.instance_id) {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Sweeps expired records. TTL already bounds them; this reclaims
    /// entries between their logical expiry and TTL eviction. Returns how
    /// many were removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, StoreError> {
        let keys = self.kv.keys_with_prefix(SESSION_PREFIX).await?;
        let now = now_ms();
        let mut removed = 0;
        for key in keys {
            let Some(json) = self.kv.get(&key).await? else {
                continue;
            };
            let expired = match serde_json::from_str::<GraceSession>(&json) {
                Ok(session) => session.expired(now),
                Err(_) => true,
            };
            if expired {
                self.kv.delete(&key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Counts live sessions, total and per instance.
    pub async fn session_stats(&self) -> Result<GraceStats, StoreError> {
        let sessions = self.list_active_sessions(None).await?;
        let mut stats = GraceStats {
            total: sessions.len(),
            by_instance: HashMap::new(),
        };
        for session in sessions {
            *stats.by_instance.entry(session.instance_id).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn persist(
        &self,
        session: &GraceSession,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        let ttl = Duration::from_secs(ttl_ms.div_ceil(1000));
        let json = serde_json::to_string(session)
            .map_err(|e| StoreError::Kv(e.to_string()))?;
        self.kv
            .put(
                &session_key(&session.player_id, &session.instance_id),
                json,
                Some(ttl),
            )
            .await?;
        let pointer = serde_json::to_string(&PlayerPointer {
            instance_id: session.instance_id.clone(),
            session_id: session.session_id.clone(),
        })
        .map_err(|e| StoreError::Kv(e.to_string()))?;
        self.kv
            .put(
                &format!("{PLAYER_PREFIX}{}", session.player_id.as_str()),
                pointer,
                Some(ttl),
            )
            .await?;
        Ok(())
    }

    async fn remove(
        &self,
        player_id: &UserId,
        instance_id: &InstanceId,
    ) -> Result<(), StoreError> {
        self.kv
            .delete(&session_key(player_id, instance_id))
            .await?;
        self.kv
            .delete(&format!("{PLAYER_PREFIX}{}", player_id.as_str()))
            .await?;
        Ok(())
    }
}

fn session_key(player_id: &UserId, instance_id: &InstanceId) -> String {
    format!(
        "{SESSION_PREFIX}{}:{}",
        player_id.as_str(),
        instance_id.as_str()
    )
}
