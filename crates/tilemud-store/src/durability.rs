//! Action durability service: persists one action event per
//! `(session, sequence)` behind the outage guard.
//!
//! Every call follows guard discipline (assert, operate, record), so a
//! wobbling store trips the circuit and later calls fail fast instead of
//! piling onto a sick database.

use std::sync::Arc;

use tilemud_protocol::{
    CharacterId, DurabilityMetadata, SessionId, catalog::CatalogError,
};

use crate::durable::{
    ActionEvent, DurableStore, InsertOutcome, NewActionEvent,
};
use crate::guard::DbOutageGuard;

/// A persisted action plus the durability metadata attached to its ack.
#[derive(Debug, Clone)]
pub struct PersistedAction {
    pub record: ActionEvent,
    pub metadata: DurabilityMetadata,
}

/// Durable persistence of action events, guarded against outages.
pub struct ActionDurabilityService<D: DurableStore> {
    store: Arc<D>,
    guard: Arc<DbOutageGuard>,
}

impl<D: DurableStore> ActionDurabilityService<D> {
    pub fn new(store: Arc<D>, guard: Arc<DbOutageGuard>) -> Self {
        Self { store, guard }
    }

    /// The guard in front of this service's store.
    pub fn guard(&self) -> &Arc<DbOutageGuard> {
        &self.guard
    }

    /// Persists an action event. A `(session, sequence)` collision is
    /// idempotent success: the original record comes back with
    /// `duplicate = true`.
    pub async fn persist_action(
        &self,
        event: NewActionEvent,
    ) -> Result<PersistedAction, CatalogError> {
        self.guard.assert_available()?;
        match self.store.insert_action_event(event).await {
            Ok(InsertOutcome::Inserted(record)) => {
                self.guard.record_success();
                Ok(PersistedAction {
                    metadata: metadata_for(&record, false),
                    record,
                })
            }
            Ok(InsertOutcome::Duplicate(record)) => {
                self.guard.record_success();
                Ok(PersistedAction {
                    metadata: metadata_for(&record, true),
                    record,
                })
            }
            Err(e) => {
                self.guard.record_failure(&e);
                Err(CatalogError::internal(format!(
                    "action persist failed: {e}"
                )))
            }
        }
    }

    pub async fn get_by_session_and_sequence(
        &self,
        session_id: &SessionId,
        sequence: i64,
    ) -> Result<Option<ActionEvent>, CatalogError> {
        self.guard.assert_available()?;
        match self
            .store
            .action_event_by_sequence(session_id, sequence)
            .await
        {
            Ok(found) => {
                self.guard.record_success();
                Ok(found)
            }
            Err(e) => {
                self.guard.record_failure(&e);
                Err(CatalogError::internal(format!(
                    "action lookup failed: {e}"
                )))
            }
        }
    }

    pub async fn get_latest_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ActionEvent>, CatalogError> {
        self.guard.assert_available()?;
        match self.store.latest_action_event(session_id).await {
            Ok(found) => {
                self.guard.record_success();
                Ok(found)
            }
            Err(e) => {
                self.guard.record_failure(&e);
                Err(CatalogError::internal(format!(
                    "latest action lookup failed: {e}"
                )))
            }
        }
    }

    /// Recent events for a character, ascending by sequence.
    pub async fn list_recent_for_character(
        &self,
        character_id: &CharacterId,
        window: usize,
    ) -> Result<Vec<ActionEvent>, CatalogError> {
        self.guard.assert_available()?;
        match self.store.recent_action_events(character_id, window).await {
            Ok(events) => {
                self.guard.record_success();
                Ok(events)
            }
            Err(e) => {
                self.guard.record_failure(&e);
                Err(CatalogError::internal(format!(
                    "recent action lookup failed: {e}"
                )))
            }
        }
    }
}

/// Durability metadata for an ack referencing `record`.
pub fn metadata_for(record: &ActionEvent, duplicate: bool) -> DurabilityMetadata {
    DurabilityMetadata {
        persisted: true,
        action_event_id: Some(record.action_event_id.as_str().to_string()),
        persisted_at: Some(record.persisted_at),
        duplicate: duplicate.then_some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryDurableStore;
    use crate::guard::GuardConfig;
    use crate::health::{DegradedSignalService, HealthConfig};
    use crate::StoreError;
    use tilemud_protocol::{ActionKind, Dependency, UserId};

    /// Durable store whose operations can be switched to fail, for
    /// exercising the guard path.
    struct FlakyStore {
        inner: MemoryDurableStore,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryDurableStore::new(),
                failing: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.failing
                .store(failing, std::sync::atomic::Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                Err(StoreError::Durable("injected failure".into()))
            } else {
                Ok(())
            }
        }
    }

    impl DurableStore for FlakyStore {
        async fn get_profile(
            &self,
            character_id: &CharacterId,
        ) -> Result<Option<crate::durable::CharacterProfile>, StoreError>
        {
            self.check()?;
            self.inner.get_profile(character_id).await
        }

        async fn upsert_profile(
            &self,
            profile: crate::durable::CharacterProfile,
        ) -> Result<crate::durable::CharacterProfile, StoreError> {
            self.check()?;
            self.inner.upsert_profile(profile).await
        }

        async fn insert_action_event(
            &self,
            event: NewActionEvent,
        ) -> Result<InsertOutcome, StoreError> {
            self.check()?;
            self.inner.insert_action_event(event).await
        }

        async fn action_event_by_sequence(
            &self,
            session_id: &SessionId,
            sequence: i64,
        ) -> Result<Option<ActionEvent>, StoreError> {
            self.check()?;
            self.inner
                .action_event_by_sequence(session_id, sequence)
                .await
        }

        async fn latest_action_event(
            &self,
            session_id: &SessionId,
        ) -> Result<Option<ActionEvent>, StoreError> {
            self.check()?;
            self.inner.latest_action_event(session_id).await
        }

        async fn recent_action_events(
            &self,
            character_id: &CharacterId,
            limit: usize,
        ) -> Result<Vec<ActionEvent>, StoreError> {
            self.check()?;
            self.inner.recent_action_events(character_id, limit).await
        }
    }

    fn service_over(
        store: Arc<FlakyStore>,
    ) -> ActionDurabilityService<FlakyStore> {
        let health =
            Arc::new(DegradedSignalService::new(HealthConfig::default()));
        let guard = Arc::new(DbOutageGuard::new(
            GuardConfig::default(),
            Dependency::Postgres,
            health,
        ));
        ActionDurabilityService::new(store, guard)
    }

    fn new_event(seq: i64) -> NewActionEvent {
        NewActionEvent {
            session_id: SessionId::new("s-1"),
            user_id: UserId::new("u-1"),
            character_id: CharacterId::new("c-1"),
            sequence_number: seq,
            action_type: ActionKind::Move,
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_persist_returns_metadata() {
        let svc = service_over(Arc::new(FlakyStore::new()));
        let persisted = svc.persist_action(new_event(1)).await.unwrap();
        assert!(persisted.metadata.persisted);
        assert!(persisted.metadata.duplicate.is_none());
        assert!(persisted.metadata.action_event_id.is_some());
    }

    #[tokio::test]
    async fn test_persist_duplicate_is_idempotent() {
        let svc = service_over(Arc::new(FlakyStore::new()));
        let first = svc.persist_action(new_event(1)).await.unwrap();
        let second = svc.persist_action(new_event(1)).await.unwrap();
        assert_eq!(second.metadata.duplicate, Some(true));
        assert_eq!(
            first.record.action_event_id,
            second.record.action_event_id
        );
    }

    #[tokio::test]
    async fn test_failures_trip_guard_and_fail_fast() {
        let store = Arc::new(FlakyStore::new());
        let svc = service_over(Arc::clone(&store));
        store.set_failing(true);
        for seq in 1..=3 {
            assert!(svc.persist_action(new_event(seq)).await.is_err());
        }
        // Circuit open: the store is no longer touched.
        store.set_failing(false);
        let err = svc.persist_action(new_event(4)).await.unwrap_err();
        assert!(err.retryable());
        assert!(err.message().contains("database_unavailable"));
    }

    #[tokio::test]
    async fn test_list_recent_orders_ascending() {
        let svc = service_over(Arc::new(FlakyStore::new()));
        for seq in [2, 1, 3] {
            svc.persist_action(new_event(seq)).await.unwrap();
        }
        let events = svc
            .list_recent_for_character(&CharacterId::new("c-1"), 10)
            .await
            .unwrap();
        let seqs: Vec<i64> =
            events.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
