//! The player session store: the in-process registry of live sessions.
//!
//! A single async mutex guards the whole map, which serializes mutations
//! per session id and across them; the critical sections are a few map
//! operations, never I/O. Every mutation returns the updated snapshot so
//! callers never read through the lock twice.

use std::collections::HashMap;

use tokio::sync::Mutex;

use tilemud_protocol::SessionId;
use tilemud_store::clock::now_ms;

use crate::{NewSession, Session, SessionError, SessionStatus};

/// In-process map of live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session, replacing any previous record under the same id.
    pub async fn create_or_update(&self, new: NewSession) -> Session {
        let now = now_ms();
        let session = Session {
            session_id: new.session_id.clone(),
            user_id: new.user_id,
            character_id: new.character_id,
            protocol_version: new.protocol_version,
            status: new.status,
            last_sequence_number: new.last_sequence_number.max(0),
            last_heartbeat_at: now,
            reconnect_attempts: 0,
            created_at: now,
        };
        let mut sessions = self.sessions.lock().await;
        sessions.insert(new.session_id, session.clone());
        tracing::info!(session_id = %session.session_id, "session opened");
        session
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &SessionId) -> Option<Session> {
        let removed = self.sessions.lock().await.remove(session_id);
        if removed.is_some() {
            tracing::info!(%session_id, "session removed");
        }
        removed
    }

    pub async fn set_status(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Result<Session, SessionError> {
        self.mutate(session_id, |session| session.status = status)
            .await
    }

    pub async fn record_heartbeat(
        &self,
        session_id: &SessionId,
        at: u64,
    ) -> Result<Session, SessionError> {
        self.mutate(session_id, |session| {
            session.last_heartbeat_at = session.last_heartbeat_at.max(at)
        })
        .await
    }

    /// Advances the acknowledged-sequence high-water mark. Monotone: a
    /// lower value never regresses it.
    pub async fn record_action_sequence(
        &self,
        session_id: &SessionId,
        sequence: i64,
    ) -> Result<Session, SessionError> {
        self.mutate(session_id, |session| {
            session.last_sequence_number =
                session.last_sequence_number.max(sequence)
        })
        .await
    }

    /// Overwrites the sequence high-water mark, flooring at zero. Only
    /// the sequence service's reset path uses this.
    pub async fn reset_action_sequence(
        &self,
        session_id: &SessionId,
        sequence: i64,
    ) -> Result<Session, SessionError> {
        self.mutate(session_id, |session| {
            session.last_sequence_number = sequence.max(0)
        })
        .await
    }

    pub async fn reset_reconnect_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Session, SessionError> {
        self.mutate(session_id, |session| session.reconnect_attempts = 0)
            .await
    }

    pub async fn increment_reconnect_attempts(
        &self,
        session_id: &SessionId,
    ) -> Result<Session, SessionError> {
        self.mutate(session_id, |session| {
            session.reconnect_attempts += 1
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    async fn mutate(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut Session),
    ) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
        f(session);
        Ok(session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilemud_protocol::{CharacterId, UserId};

    fn new_session(id: &str) -> NewSession {
        NewSession {
            session_id: SessionId::new(id),
            user_id: UserId::new("u-1"),
            character_id: CharacterId::new("c-1"),
            protocol_version: "1.0.0".into(),
            status: SessionStatus::Active,
            last_sequence_number: 0,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SessionStore::new();
        let created = store.create_or_update(new_session("s-1")).await;
        assert_eq!(created.status, SessionStatus::Active);
        assert_eq!(created.reconnect_attempts, 0);
        let fetched = store.get(&SessionId::new("s-1")).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_floors_negative_sequence() {
        let store = SessionStore::new();
        let mut new = new_session("s-1");
        new.last_sequence_number = -5;
        let created = store.create_or_update(new).await;
        assert_eq!(created.last_sequence_number, 0);
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let store = SessionStore::new();
        assert!(store.get(&SessionId::new("nope")).await.is_none());
    }

    #[tokio::test]
    async fn test_set_status_returns_updated_snapshot() {
        let store = SessionStore::new();
        store.create_or_update(new_session("s-1")).await;
        let updated = store
            .set_status(&SessionId::new("s-1"), SessionStatus::Grace)
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Grace);
    }

    #[tokio::test]
    async fn test_set_status_unknown_errors() {
        let store = SessionStore::new();
        let result = store
            .set_status(&SessionId::new("ghost"), SessionStatus::Active)
            .await;
        assert!(matches!(result, Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_record_action_sequence_is_monotone() {
        let store = SessionStore::new();
        store.create_or_update(new_session("s-1")).await;
        let id = SessionId::new("s-1");
        let s = store.record_action_sequence(&id, 5).await.unwrap();
        assert_eq!(s.last_sequence_number, 5);
        let s = store.record_action_sequence(&id, 3).await.unwrap();
        assert_eq!(s.last_sequence_number, 5, "must not regress");
        let s = store.record_action_sequence(&id, 6).await.unwrap();
        assert_eq!(s.last_sequence_number, 6);
    }

    #[tokio::test]
    async fn test_reset_action_sequence_overwrites_and_floors() {
        let store = SessionStore::new();
        store.create_or_update(new_session("s-1")).await;
        let id = SessionId::new("s-1");
        store.record_action_sequence(&id, 9).await.unwrap();
        let s = store.reset_action_sequence(&id, 4).await.unwrap();
        assert_eq!(s.last_sequence_number, 4);
        let s = store.reset_action_sequence(&id, -1).await.unwrap();
        assert_eq!(s.last_sequence_number, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_never_regresses() {
        let store = SessionStore::new();
        let created = store.create_or_update(new_session("s-1")).await;
        let id = SessionId::new("s-1");
        let later = created.last_heartbeat_at + 50;
        let s = store.record_heartbeat(&id, later).await.unwrap();
        assert_eq!(s.last_heartbeat_at, later);
        let s = store.record_heartbeat(&id, later - 10).await.unwrap();
        assert_eq!(s.last_heartbeat_at, later);
    }

    #[tokio::test]
    async fn test_reconnect_attempt_counters() {
        let store = SessionStore::new();
        store.create_or_update(new_session("s-1")).await;
        let id = SessionId::new("s-1");
        store.increment_reconnect_attempts(&id).await.unwrap();
        let s = store.increment_reconnect_attempts(&id).await.unwrap();
        assert_eq!(s.reconnect_attempts, 2);
        let s = store.reset_reconnect_attempts(&id).await.unwrap();
        assert_eq!(s.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_remove_returns_final_snapshot() {
        let store = SessionStore::new();
        store.create_or_update(new_session("s-1")).await;
        assert_eq!(store.len().await, 1);
        let removed = store.remove(&SessionId::new("s-1")).await.unwrap();
        assert_eq!(removed.session_id, SessionId::new("s-1"));
        assert!(store.is_empty().await);
        assert!(store.remove(&SessionId::new("s-1")).await.is_none());
    }

    #[tokio::test]
    async fn test_create_or_update_replaces_existing() {
        let store = SessionStore::new();
        store.create_or_update(new_session("s-1")).await;
        store
            .record_action_sequence(&SessionId::new("s-1"), 7)
            .await
            .unwrap();
        let replaced = store.create_or_update(new_session("s-1")).await;
        assert_eq!(replaced.last_sequence_number, 0);
    }
}
