//! Reconnect flow: token in, delta-or-snapshot resume out.
//!
//! The sequence high-water mark is reconstructed from three sources
//! (the consumed token, the in-memory session, and the durable action
//! log) and the max wins. A delta replay is only offered when the durable
//! events form a contiguous run from `client_sequence + 1` through that
//! mark; the log can legitimately have holes (persists failed during an
//! outage), and a holey replay would corrupt the client's view, so any
//! gap forces a snapshot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tilemud_protocol::{CharacterSnapshot, ReconnectTokenRef};
use tilemud_store::clock::now_ms;
use tilemud_store::{
    ActionDurabilityService, ActionEvent, DurableStore, KvStore,
};

use crate::profiles::{ProfileService, fallback_snapshot, snapshot_of};
use crate::{
    ReconnectTokenStore, Session, SessionError, SessionStatus, SessionStore,
};

/// Default maximum gap bridged by delta replay.
pub const DEFAULT_DELTA_WINDOW: i64 = 50;

/// Inputs to a resume attempt.
#[derive(Debug, Clone)]
pub struct ReconnectRequest {
    pub reconnect_token: String,
    /// The last sequence the client saw. Defaults to the token's bound
    /// sequence when omitted.
    pub client_sequence: Option<i64>,
}

/// How the client should restore its view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    Delta,
    Snapshot,
}

/// The missed events, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaReplay {
    pub from_sequence: i64,
    pub to_sequence: i64,
    pub events: Vec<ActionEvent>,
}

/// The full resume result.
#[derive(Debug, Clone)]
pub struct ReconnectResponse {
    pub session: Session,
    pub last_sequence_number: i64,
    pub reconnect: ReconnectTokenRef,
    pub mode: ReplayMode,
    pub delta: Option<DeltaReplay>,
    pub snapshot: Option<CharacterSnapshot>,
}

/// Resumes sessions across connections.
pub struct ReconnectFlowService<K: KvStore, D: DurableStore> {
    sessions: Arc<SessionStore>,
    tokens: Arc<ReconnectTokenStore<K>>,
    durability: Arc<ActionDurabilityService<D>>,
    profiles: Arc<ProfileService<D>>,
    delta_window: i64,
}

impl<K: KvStore, D: DurableStore> ReconnectFlowService<K, D> {
    pub fn new(
        sessions: Arc<SessionStore>,
        tokens: Arc<ReconnectTokenStore<K>>,
        durability: Arc<ActionDurabilityService<D>>,
        profiles: Arc<ProfileService<D>>,
        delta_window: i64,
    ) -> Self {
        Self {
            sessions,
            tokens,
            durability,
            profiles,
            delta_window: delta_window.max(1),
        }
    }

    pub async fn resume(
        &self,
        request: ReconnectRequest,
    ) -> Result<ReconnectResponse, SessionError> {
        let token = self
            .tokens
            .consume(&request.reconnect_token)
            .await?
            .ok_or(SessionError::ReconnectTokenInvalid)?;

        let session =
            self.sessions.get(&token.session_id).await.ok_or_else(|| {
                SessionError::SessionNotFoundForReconnect(
                    token.session_id.clone(),
                )
            })?;
        self.sessions
            .increment_reconnect_attempts(&session.session_id)
            .await?;

        // High-water mark: the max of token, session, and durable log.
        // A durable read failure degrades to the first two; the replay
        // decision below will then fall back to a snapshot if needed.
        let durable_latest = match self
            .durability
            .get_latest_for_session(&session.session_id)
            .await
        {
            Ok(latest) => latest.map(|e| e.sequence_number).unwrap_or(0),
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "durable latest unavailable during resume"
                );
                0
            }
        };
        let latest_sequence = token
            .last_sequence_number
            .max(session.last_sequence_number)
            .max(durable_latest);

        let client_sequence = request
            .client_sequence
            .unwrap_or(token.last_sequence_number);

        let (mode, delta) = self
            .choose_replay(&session, client_sequence, latest_sequence)
            .await;

        let now = now_ms();
        self.sessions
            .record_heartbeat(&session.session_id, now)
            .await?;
        self.sessions
            .set_status(&session.session_id, SessionStatus::Active)
            .await?;
        self.sessions
            .reset_reconnect_attempts(&session.session_id)
            .await?;
        let session = self
            .sessions
            .record_action_sequence(&session.session_id, latest_sequence)
            .await?;

        let reconnect = self
            .tokens
            .issue(session.session_id.clone(), latest_sequence, None)
            .await?
            .to_ref();

        let snapshot = match mode {
            ReplayMode::Delta => None,
            ReplayMode::Snapshot => Some(self.build_snapshot(&session).await),
        };

        tracing::info!(
            session_id = %session.session_id,
            ?mode,
            last_sequence = latest_sequence,
            "session resumed"
        );

        Ok(ReconnectResponse {
            last_sequence_number: latest_sequence,
            reconnect,
            mode,
            delta,
            snapshot,
            session,
        })
    }

    /// Delta iff the gap fits the window and the durable events cover it
    /// contiguously; otherwise snapshot.
    async fn choose_replay(
        &self,
        session: &Session,
        client_sequence: i64,
        latest_sequence: i64,
    ) -> (ReplayMode, Option<DeltaReplay>) {
        if latest_sequence <= client_sequence {
            return (
                ReplayMode::Delta,
                Some(DeltaReplay {
                    from_sequence: client_sequence,
                    to_sequence: latest_sequence,
                    events: Vec::new(),
                }),
            );
        }

        let gap = latest_sequence - client_sequence;
        if gap > self.delta_window {
            return (ReplayMode::Snapshot, None);
        }

        let recent = match self
            .durability
            .list_recent_for_character(
                &session.character_id,
                self.delta_window as usize,
            )
            .await
        {
            Ok(events) => events,
            Err(_) => return (ReplayMode::Snapshot, None),
        };

        let mut events: Vec<ActionEvent> = recent
            .into_iter()
            .filter(|e| {
                e.session_id == session.session_id
                    && e.sequence_number > client_sequence
            })
            .collect();
        events.sort_by_key(|e| e.sequence_number);

        let contiguous = !events.is_empty()
            && events[0].sequence_number == client_sequence + 1
            && events
                .last()
                .is_some_and(|e| e.sequence_number == latest_sequence)
            && events
                .windows(2)
                .all(|w| w[1].sequence_number == w[0].sequence_number + 1);

        if contiguous {
            (
                ReplayMode::Delta,
                Some(DeltaReplay {
                    from_sequence: client_sequence,
                    to_sequence: latest_sequence,
                    events,
                }),
            )
        } else {
            (ReplayMode::Snapshot, None)
        }
    }

    /// Snapshot from the profile, degrading to a synthetic default. This
    /// path never fails: a resume must not crash on a cold store.
    async fn build_snapshot(&self, session: &Session) -> CharacterSnapshot {
        match self.profiles.get(&session.character_id).await {
            Ok(Some(profile)) => snapshot_of(&profile),
            Ok(None) | Err(_) => fallback_snapshot(
                &session.character_id,
                &session.user_id,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::NewSession;
    use crate::tokens::DEFAULT_TOKEN_TTL_SECONDS;
    use tilemud_protocol::{
        ActionKind, CharacterId, Dependency, SessionId, UserId,
    };
    use tilemud_store::{
        DbOutageGuard, DegradedSignalService, GuardConfig, HealthConfig,
        MemoryDurableStore, MemoryKvStore, NewActionEvent,
    };

    struct Fixture {
        flow: ReconnectFlowService<MemoryKvStore, MemoryDurableStore>,
        sessions: Arc<SessionStore>,
        tokens: Arc<ReconnectTokenStore<MemoryKvStore>>,
        durability: Arc<ActionDurabilityService<MemoryDurableStore>>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKvStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let health =
            Arc::new(DegradedSignalService::new(HealthConfig::default()));
        let guard = Arc::new(DbOutageGuard::new(
            GuardConfig::default(),
            Dependency::Postgres,
            health,
        ));
        let sessions = Arc::new(SessionStore::new());
        let tokens = Arc::new(ReconnectTokenStore::new(
            Arc::clone(&kv),
            DEFAULT_TOKEN_TTL_SECONDS,
        ));
        let durability = Arc::new(ActionDurabilityService::new(
            Arc::clone(&durable),
            Arc::clone(&guard),
        ));
        let profiles =
            Arc::new(ProfileService::new(durable, Arc::clone(&guard)));
        Fixture {
            flow: ReconnectFlowService::new(
                Arc::clone(&sessions),
                Arc::clone(&tokens),
                Arc::clone(&durability),
                profiles,
                DEFAULT_DELTA_WINDOW,
            ),
            sessions,
            tokens,
            durability,
        }
    }

    async fn open_session(fx: &Fixture, last_seq: i64) -> Session {
        fx.sessions
            .create_or_update(NewSession {
                session_id: SessionId::new("s-1"),
                user_id: UserId::new("u-1"),
                character_id: CharacterId::new("c-1"),
                protocol_version: "1.0.0".into(),
                status: SessionStatus::Grace,
                last_sequence_number: last_seq,
            })
            .await
    }

    async fn persist(fx: &Fixture, seq: i64) {
        fx.durability
            .persist_action(NewActionEvent {
                session_id: SessionId::new("s-1"),
                user_id: UserId::new("u-1"),
                character_id: CharacterId::new("c-1"),
                sequence_number: seq,
                action_type: ActionKind::Move,
                payload: serde_json::json!({ "seq": seq }),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_token_fails() {
        let fx = fixture();
        let err = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: "bogus".into(),
                client_sequence: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ReconnectTokenInvalid));
    }

    #[tokio::test]
    async fn test_token_without_session_fails() {
        let fx = fixture();
        let token = fx
            .tokens
            .issue(SessionId::new("gone"), 0, None)
            .await
            .unwrap();
        let err = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::SessionNotFoundForReconnect(_)
        ));
    }

    #[tokio::test]
    async fn test_up_to_date_client_gets_empty_delta() {
        let fx = fixture();
        open_session(&fx, 2).await;
        let token = fx
            .tokens
            .issue(SessionId::new("s-1"), 2, None)
            .await
            .unwrap();

        let response = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: Some(2),
            })
            .await
            .unwrap();

        assert_eq!(response.mode, ReplayMode::Delta);
        let delta = response.delta.unwrap();
        assert!(delta.events.is_empty());
        assert_eq!(response.session.status, SessionStatus::Active);
        assert_eq!(response.session.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_contiguous_gap_replays_delta() {
        let fx = fixture();
        open_session(&fx, 2).await;
        persist(&fx, 1).await;
        persist(&fx, 2).await;
        let token = fx
            .tokens
            .issue(SessionId::new("s-1"), 2, None)
            .await
            .unwrap();

        let response = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: Some(1),
            })
            .await
            .unwrap();

        assert_eq!(response.mode, ReplayMode::Delta);
        let delta = response.delta.unwrap();
        assert_eq!(delta.from_sequence, 1);
        assert_eq!(delta.to_sequence, 2);
        assert_eq!(delta.events.len(), 1);
        assert_eq!(delta.events[0].sequence_number, 2);
        assert_eq!(response.last_sequence_number, 2);
        assert_eq!(response.session.last_sequence_number, 2);
        assert!(response.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_hole_in_log_forces_snapshot() {
        let fx = fixture();
        open_session(&fx, 4).await;
        // Sequence 3 never persisted (outage): 2 and 4 exist.
        persist(&fx, 2).await;
        persist(&fx, 4).await;
        let token = fx
            .tokens
            .issue(SessionId::new("s-1"), 4, None)
            .await
            .unwrap();

        let response = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: Some(1),
            })
            .await
            .unwrap();

        assert_eq!(response.mode, ReplayMode::Snapshot);
        assert!(response.delta.is_none());
        assert!(response.snapshot.is_some());
    }

    #[tokio::test]
    async fn test_gap_beyond_window_forces_snapshot() {
        let kv = Arc::new(MemoryKvStore::new());
        let durable = Arc::new(MemoryDurableStore::new());
        let health =
            Arc::new(DegradedSignalService::new(HealthConfig::default()));
        let guard = Arc::new(DbOutageGuard::new(
            GuardConfig::default(),
            Dependency::Postgres,
            health,
        ));
        let sessions = Arc::new(SessionStore::new());
        let tokens = Arc::new(ReconnectTokenStore::new(
            Arc::clone(&kv),
            DEFAULT_TOKEN_TTL_SECONDS,
        ));
        let durability = Arc::new(ActionDurabilityService::new(
            Arc::clone(&durable),
            Arc::clone(&guard),
        ));
        let profiles =
            Arc::new(ProfileService::new(durable, Arc::clone(&guard)));
        // Tiny delta window: any real gap snapshots.
        let flow = ReconnectFlowService::new(
            Arc::clone(&sessions),
            Arc::clone(&tokens),
            durability,
            profiles,
            2,
        );

        sessions
            .create_or_update(NewSession {
                session_id: SessionId::new("s-1"),
                user_id: UserId::new("u-1"),
                character_id: CharacterId::new("c-1"),
                protocol_version: "1.0.0".into(),
                status: SessionStatus::Grace,
                last_sequence_number: 10,
            })
            .await;
        let token = tokens
            .issue(SessionId::new("s-1"), 10, None)
            .await
            .unwrap();

        let response = flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(response.mode, ReplayMode::Snapshot);
    }

    #[tokio::test]
    async fn test_latest_sequence_is_max_of_sources() {
        let fx = fixture();
        // Session says 1, durable log says 3, token says 2.
        open_session(&fx, 1).await;
        persist(&fx, 1).await;
        persist(&fx, 2).await;
        persist(&fx, 3).await;
        let token = fx
            .tokens
            .issue(SessionId::new("s-1"), 2, None)
            .await
            .unwrap();

        let response = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: Some(1),
            })
            .await
            .unwrap();

        assert_eq!(response.last_sequence_number, 3);
        assert_eq!(response.mode, ReplayMode::Delta);
        let delta = response.delta.unwrap();
        assert_eq!(
            delta
                .events
                .iter()
                .map(|e| e.sequence_number)
                .collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test]
    async fn test_resume_reissues_fresh_token() {
        let fx = fixture();
        open_session(&fx, 0).await;
        let token = fx
            .tokens
            .issue(SessionId::new("s-1"), 0, None)
            .await
            .unwrap();
        let original = token.token.clone();

        let response = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: None,
            })
            .await
            .unwrap();

        assert_ne!(response.reconnect.token, original);
        // The original is consumed: a second resume with it fails.
        let err = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: original,
                client_sequence: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ReconnectTokenInvalid));
    }

    #[tokio::test]
    async fn test_events_from_other_sessions_are_ignored() {
        let fx = fixture();
        open_session(&fx, 1).await;
        persist(&fx, 1).await;
        // Same character, different session: must not pollute the delta.
        fx.durability
            .persist_action(NewActionEvent {
                session_id: SessionId::new("s-other"),
                user_id: UserId::new("u-1"),
                character_id: CharacterId::new("c-1"),
                sequence_number: 2,
                action_type: ActionKind::Chat,
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();
        let token = fx
            .tokens
            .issue(SessionId::new("s-1"), 1, None)
            .await
            .unwrap();

        let response = fx
            .flow
            .resume(ReconnectRequest {
                reconnect_token: token.token,
                client_sequence: Some(0),
            })
            .await
            .unwrap();

        assert_eq!(response.mode, ReplayMode::Delta);
        let delta = response.delta.unwrap();
        assert_eq!(delta.events.len(), 1);
        assert_eq!(delta.events[0].session_id, SessionId::new("s-1"));
    }
}
