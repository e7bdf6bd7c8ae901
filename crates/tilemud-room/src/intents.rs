//! Realtime intent processing: sequence gate → side effects → ack/error.
//!
//! The processor owns no connection state; the room hands it a mutable
//! [`PlayerState`] (the session-local working copy of the character) and
//! an intent, and gets back exactly one ack or error plus an optional
//! state delta. It never panics a session: every failure path produces a
//! wire error payload.

use std::collections::VecDeque;
use std::sync::Arc;

use tilemud_protocol::catalog::{CatalogError, ErrorCategory};
use tilemud_protocol::{
    AckStatus, ActionIntent, ActionKind, ChatIntent, CharacterId, Effect,
    ErrorPayload, IntentAck, IntentEnvelope, MoveIntent, SessionId,
    StateDeltaPayload, UserId,
};
use tilemud_session::{
    ActionSequenceService, SequenceEvaluation, snapshot_of,
};
use tilemud_store::clock::now_ms;
use tilemud_store::{
    ActionDurabilityService, CharacterProfile, DurableStore,
    NewActionEvent, metadata_for,
};

/// In-process chat admission: 5 messages per 10 s per session.
pub const CHAT_WINDOW_LIMIT: u32 = 5;
pub const CHAT_WINDOW_MS: u64 = 10_000;

/// Sliding chat window owned by a single session's task.
#[derive(Debug, Clone, Default)]
pub struct ChatWindow {
    admissions: VecDeque<u64>,
}

impl ChatWindow {
    /// Admits a message at `now`, or reports seconds until space opens.
    pub fn try_admit(&mut self, now: u64) -> Result<(), u64> {
        while let Some(&oldest) = self.admissions.front() {
            if oldest + CHAT_WINDOW_MS <= now {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
        if self.admissions.len() >= CHAT_WINDOW_LIMIT as usize {
            let oldest = *self.admissions.front().expect("non-empty");
            let wait_ms = (oldest + CHAT_WINDOW_MS).saturating_sub(now);
            return Err(wait_ms.div_ceil(1000).max(1));
        }
        self.admissions.push_back(now);
        Ok(())
    }
}

/// The session-local player state an intent mutates.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub character_id: CharacterId,
    /// Working copy of the durable profile.
    pub profile: CharacterProfile,
    pub chat_window: ChatWindow,
}

impl PlayerState {
    pub fn new(
        session_id: SessionId,
        user_id: UserId,
        profile: CharacterProfile,
    ) -> Self {
        Self {
            session_id,
            user_id,
            character_id: profile.character_id.clone(),
            profile,
            chat_window: ChatWindow::default(),
        }
    }
}

/// What an intent produced.
#[derive(Debug, Clone)]
pub enum IntentOutcome {
    /// Success (applied or duplicate): an ack, possibly with a delta to
    /// fan out.
    Ack {
        ack: IntentAck,
        delta: Option<StateDeltaPayload>,
    },
    /// Failure: a single error envelope for the origin client.
    Error(ErrorPayload),
}

/// Converts validated intents into durable events, state mutations, and
/// acks.
pub struct IntentProcessor<D: DurableStore> {
    sequence: Arc<ActionSequenceService>,
    durability: Arc<ActionDurabilityService<D>>,
}

impl<D: DurableStore> IntentProcessor<D> {
    pub fn new(
        sequence: Arc<ActionSequenceService>,
        durability: Arc<ActionDurabilityService<D>>,
    ) -> Self {
        Self {
            sequence,
            durability,
        }
    }

    pub async fn process(
        &self,
        player: &mut PlayerState,
        intent: &IntentEnvelope,
    ) -> IntentOutcome {
        let intent_type = intent.intent_type();
        let sequence = intent.sequence();

        match self
            .sequence
            .evaluate(&player.session_id, sequence)
            .await
        {
            SequenceEvaluation::Accept => {}
            SequenceEvaluation::Duplicate => {
                return self
                    .duplicate_ack(player, intent_type, sequence)
                    .await;
            }
            SequenceEvaluation::Gap { .. } => {
                return IntentOutcome::Error(
                    ErrorPayload::new(
                        "SEQ_GAP",
                        ErrorCategory::Consistency,
                        true,
                        "sequence gap detected; resync scheduled",
                    )
                    .for_intent(intent_type, sequence),
                );
            }
            SequenceEvaluation::MissingSession => {
                return IntentOutcome::Error(
                    ErrorPayload::new(
                        "SEQ_MISSING_SESSION",
                        ErrorCategory::Consistency,
                        true,
                        "session unknown; full resync required",
                    )
                    .for_intent(intent_type, sequence),
                );
            }
            SequenceEvaluation::Invalid => {
                return IntentOutcome::Error(
                    ErrorPayload::new(
                        "SEQ_INVALID",
                        ErrorCategory::Validation,
                        false,
                        "sequence must be a non-negative integer",
                    )
                    .for_intent(intent_type, sequence),
                );
            }
        }

        match intent {
            IntentEnvelope::Move(move_intent) => {
                self.apply_move(player, move_intent).await
            }
            IntentEnvelope::Chat(chat_intent) => {
                self.apply_chat(player, chat_intent).await
            }
            IntentEnvelope::Action(action_intent) => {
                self.apply_action(player, action_intent).await
            }
        }
    }

    async fn apply_move(
        &self,
        player: &mut PlayerState,
        intent: &MoveIntent,
    ) -> IntentOutcome {
        // Defensive clamp: schema validation bounds magnitude already,
        // but callers other than the room dispatch may not.
        let magnitude = intent.magnitude.clamp(1, 3);
        let origin = player.profile.position;
        let target = origin.step(intent.direction, i64::from(magnitude));

        let payload = serde_json::json!({
            "direction": intent.direction,
            "magnitude": magnitude,
            "origin": origin,
            "target": target,
            "metadata": intent.metadata,
        });
        let persisted = match self
            .durability
            .persist_action(NewActionEvent {
                session_id: player.session_id.clone(),
                user_id: player.user_id.clone(),
                character_id: player.character_id.clone(),
                sequence_number: intent.sequence,
                action_type: ActionKind::Move,
                payload,
            })
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                return persist_error(e, "intent.move", intent.sequence);
            }
        };

        player.profile.position = target;
        if let Err(e) = self
            .sequence
            .acknowledge(&player.session_id, intent.sequence)
            .await
        {
            tracing::error!(
                session_id = %player.session_id,
                error = %e,
                "acknowledge failed after persist"
            );
        }

        let now = now_ms();
        let action_id =
            persisted.record.action_event_id.as_str().to_string();
        IntentOutcome::Ack {
            ack: IntentAck {
                intent_type: "intent.move".into(),
                sequence: intent.sequence,
                status: AckStatus::Applied,
                acknowledged_at: now,
                durability: Some(persisted.metadata),
                latency_ms: None,
                message: None,
            },
            delta: Some(StateDeltaPayload {
                sequence: intent.sequence,
                issued_at: now,
                character: Some(snapshot_of(&player.profile)),
                world: None,
                effects: vec![Effect::movement(
                    action_id,
                    origin,
                    target,
                    intent.direction,
                    magnitude,
                )],
                reconnect_token: None,
            }),
        }
    }

    async fn apply_chat(
        &self,
        player: &mut PlayerState,
        intent: &ChatIntent,
    ) -> IntentOutcome {
        if let Err(retry_after) = player.chat_window.try_admit(now_ms()) {
            // No persist, no sequence advance: the client must bump the
            // sequence and wait.
            return IntentOutcome::Error(
                ErrorPayload::new(
                    "CHAT_RATE_LIMIT_EXCEEDED",
                    ErrorCategory::RateLimit,
                    false,
                    format!(
                        "chat limit reached; retry in {retry_after}s"
                    ),
                )
                .for_intent("intent.chat", intent.sequence),
            );
        }

        let payload = serde_json::json!({
            "channel": intent.channel,
            "message": intent.message,
            "locale": intent.locale,
        });
        let persisted = match self
            .durability
            .persist_action(NewActionEvent {
                session_id: player.session_id.clone(),
                user_id: player.user_id.clone(),
                character_id: player.character_id.clone(),
                sequence_number: intent.sequence,
                action_type: ActionKind::Chat,
                payload,
            })
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                return persist_error(e, "intent.chat", intent.sequence);
            }
        };

        if let Err(e) = self
            .sequence
            .acknowledge(&player.session_id, intent.sequence)
            .await
        {
            tracing::error!(
                session_id = %player.session_id,
                error = %e,
                "acknowledge failed after persist"
            );
        }

        IntentOutcome::Ack {
            ack: IntentAck {
                intent_type: "intent.chat".into(),
                sequence: intent.sequence,
                status: AckStatus::Applied,
                acknowledged_at: now_ms(),
                durability: Some(persisted.metadata),
                latency_ms: None,
                message: None,
            },
            delta: None,
        }
    }

    async fn apply_action(
        &self,
        player: &mut PlayerState,
        intent: &ActionIntent,
    ) -> IntentOutcome {
        let kind = intent.kind;
        let payload = serde_json::json!({
            "actionId": intent.action_id,
            "kind": kind,
            "target": intent.target,
            "metadata": intent.metadata,
        });
        let persisted = match self
            .durability
            .persist_action(NewActionEvent {
                session_id: player.session_id.clone(),
                user_id: player.user_id.clone(),
                character_id: player.character_id.clone(),
                sequence_number: intent.sequence,
                action_type: kind,
                payload,
            })
            .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                return persist_error(e, "intent.action", intent.sequence);
            }
        };

        if let Err(e) = self
            .sequence
            .acknowledge(&player.session_id, intent.sequence)
            .await
        {
            tracing::error!(
                session_id = %player.session_id,
                error = %e,
                "acknowledge failed after persist"
            );
        }

        let now = now_ms();
        IntentOutcome::Ack {
            ack: IntentAck {
                intent_type: "intent.action".into(),
                sequence: intent.sequence,
                status: AckStatus::Applied,
                acknowledged_at: now,
                durability: Some(persisted.metadata),
                latency_ms: None,
                message: None,
            },
            delta: Some(StateDeltaPayload {
                sequence: intent.sequence,
                issued_at: now,
                character: None,
                world: None,
                effects: vec![Effect::action(
                    kind,
                    intent.action_id.clone(),
                    intent.target.as_ref(),
                    intent.metadata.clone(),
                )],
                reconnect_token: None,
            }),
        }
    }

    /// Duplicate sequences ack idempotently, with the stored record's
    /// durability metadata when it is reachable.
    async fn duplicate_ack(
        &self,
        player: &PlayerState,
        intent_type: &str,
        sequence: i64,
    ) -> IntentOutcome {
        let durability = match self
            .durability
            .get_by_session_and_sequence(&player.session_id, sequence)
            .await
        {
            Ok(Some(record)) => Some(metadata_for(&record, true)),
            Ok(None) | Err(_) => None,
        };
        IntentOutcome::Ack {
            ack: IntentAck {
                intent_type: intent_type.into(),
                sequence,
                status: AckStatus::Duplicate,
                acknowledged_at: now_ms(),
                durability,
                latency_ms: None,
                message: None,
            },
            delta: None,
        }
    }
}

/// Persistence failures surface as retryable errors; the catalog reason
/// (uppercased) is the wire code, so an outage reads as
/// `INTERNAL_ERROR`/`SYSTEM`.
fn persist_error(
    err: CatalogError,
    intent_type: &str,
    sequence: i64,
) -> IntentOutcome {
    let mut payload =
        ErrorPayload::from_catalog(&err).for_intent(intent_type, sequence);
    payload.retryable = true;
    IntentOutcome::Error(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilemud_protocol::{Dependency, Direction, Position};
    use tilemud_session::{
        DEFAULT_PENDING_SNAPSHOT_TTL_MS, NewSession, SessionStatus,
        SessionStore,
    };
    use tilemud_store::{
        DbOutageGuard, DegradedSignalService, GuardConfig, HealthConfig,
        MemoryDurableStore, StoreError,
    };

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

    impl tilemud_store::DurableStore for FlakyStore {
        async fn get_profile(
            &self,
            character_id: &CharacterId,
        ) -> Result<Option<CharacterProfile>, StoreError> {
            self.check()?;
            self.inner.get_profile(character_id).await
        }

        async fn upsert_profile(
            &self,
            profile: CharacterProfile,
        ) -> Result<CharacterProfile, StoreError> {
            self.check()?;
            self.inner.upsert_profile(profile).await
        }

        async fn insert_action_event(
            &self,
            event: NewActionEvent,
        ) -> Result<tilemud_store::InsertOutcome, StoreError> {
            self.check()?;
            self.inner.insert_action_event(event).await
        }

        async fn action_event_by_sequence(
            &self,
            session_id: &SessionId,
            sequence: i64,
        ) -> Result<Option<tilemud_store::ActionEvent>, StoreError>
        {
            self.check()?;
            self.inner
                .action_event_by_sequence(session_id, sequence)
                .await
        }

        async fn latest_action_event(
            &self,
            session_id: &SessionId,
        ) -> Result<Option<tilemud_store::ActionEvent>, StoreError>
        {
            self.check()?;
            self.inner.latest_action_event(session_id).await
        }

        async fn recent_action_events(
            &self,
            character_id: &CharacterId,
            limit: usize,
        ) -> Result<Vec<tilemud_store::ActionEvent>, StoreError>
        {
            self.check()?;
            self.inner.recent_action_events(character_id, limit).await
        }
    }

    struct Fixture {
        processor: IntentProcessor<FlakyStore>,
        store: Arc<FlakyStore>,
        sessions: Arc<SessionStore>,
        player: PlayerState,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(FlakyStore::new());
        let health =
            Arc::new(DegradedSignalService::new(HealthConfig::default()));
        let guard = Arc::new(DbOutageGuard::new(
            GuardConfig::default(),
            Dependency::Postgres,
            health,
        ));
        let durability = Arc::new(ActionDurabilityService::new(
            Arc::clone(&store),
            guard,
        ));
        let sessions = Arc::new(SessionStore::new());
        sessions
            .create_or_update(NewSession {
                session_id: SessionId::new("s-1"),
                user_id: UserId::new("u-1"),
                character_id: CharacterId::new("c-1"),
                protocol_version: "1.0.0".into(),
                status: SessionStatus::Active,
                last_sequence_number: 0,
            })
            .await;
        let sequence = Arc::new(ActionSequenceService::new(
            Arc::clone(&sessions),
            DEFAULT_PENDING_SNAPSHOT_TTL_MS,
        ));
        let player = PlayerState::new(
            SessionId::new("s-1"),
            UserId::new("u-1"),
            CharacterProfile::default_for(
                CharacterId::new("c-1"),
                UserId::new("u-1"),
            ),
        );
        Fixture {
            processor: IntentProcessor::new(sequence, durability),
            store,
            sessions,
            player,
        }
    }

    fn move_intent(sequence: i64, direction: Direction, magnitude: u32) -> IntentEnvelope {
        IntentEnvelope::Move(MoveIntent {
            sequence,
            direction,
            magnitude,
            metadata: None,
        })
    }

    fn chat(sequence: i64) -> IntentEnvelope {
        IntentEnvelope::Chat(ChatIntent {
            sequence,
            channel: "global".into(),
            message: "hi".into(),
            locale: None,
        })
    }

    // =====================================================================
    // Move
    // =====================================================================

    #[tokio::test]
    async fn test_move_applies_and_emits_delta() {
        let mut fx = fixture().await;
        let outcome = fx
            .processor
            .process(
                &mut fx.player,
                &move_intent(1, Direction::East, 2),
            )
            .await;

        let IntentOutcome::Ack { ack, delta } = outcome else {
            panic!("expected ack");
        };
        assert_eq!(ack.status, AckStatus::Applied);
        assert_eq!(ack.sequence, 1);
        assert!(ack.durability.as_ref().unwrap().persisted);

        let delta = delta.unwrap();
        let character = delta.character.unwrap();
        assert_eq!(character.position, Position::new(2, 0));
        assert_eq!(delta.effects.len(), 1);
        assert_eq!(delta.effects[0].kind, "movement");
        assert_eq!(delta.effects[0].magnitude, Some(2));

        assert_eq!(fx.player.profile.position, Position::new(2, 0));
        let session =
            fx.sessions.get(&SessionId::new("s-1")).await.unwrap();
        assert_eq!(session.last_sequence_number, 1);
    }

    #[tokio::test]
    async fn test_moves_compose() {
        let mut fx = fixture().await;
        fx.processor
            .process(&mut fx.player, &move_intent(1, Direction::East, 2))
            .await;
        fx.processor
            .process(&mut fx.player, &move_intent(2, Direction::North, 1))
            .await;
        assert_eq!(fx.player.profile.position, Position::new(2, -1));
    }

    // =====================================================================
    // Sequence handling
    // =====================================================================

    #[tokio::test]
    async fn test_duplicate_acks_without_reapplying() {
        let mut fx = fixture().await;
        fx.processor
            .process(&mut fx.player, &move_intent(1, Direction::East, 2))
            .await;
        let position_after_first = fx.player.profile.position;

        let outcome = fx
            .processor
            .process(&mut fx.player, &move_intent(1, Direction::East, 2))
            .await;
        let IntentOutcome::Ack { ack, delta } = outcome else {
            panic!("expected duplicate ack");
        };
        assert_eq!(ack.status, AckStatus::Duplicate);
        assert_eq!(
            ack.durability.as_ref().unwrap().duplicate,
            Some(true)
        );
        assert!(delta.is_none());
        assert_eq!(
            fx.player.profile.position, position_after_first,
            "side effects must not re-apply"
        );
    }

    #[tokio::test]
    async fn test_gap_errors_and_preserves_sequence() {
        let mut fx = fixture().await;
        fx.processor
            .process(&mut fx.player, &move_intent(1, Direction::East, 1))
            .await;

        let outcome = fx
            .processor
            .process(&mut fx.player, &move_intent(5, Direction::East, 1))
            .await;
        let IntentOutcome::Error(error) = outcome else {
            panic!("expected error");
        };
        assert_eq!(error.code, "SEQ_GAP");
        assert_eq!(error.category, ErrorCategory::Consistency);
        assert!(error.retryable);

        let session =
            fx.sessions.get(&SessionId::new("s-1")).await.unwrap();
        assert_eq!(session.last_sequence_number, 1);
    }

    #[tokio::test]
    async fn test_missing_session_errors() {
        let mut fx = fixture().await;
        fx.player.session_id = SessionId::new("ghost");
        let outcome = fx
            .processor
            .process(&mut fx.player, &move_intent(1, Direction::East, 1))
            .await;
        let IntentOutcome::Error(error) = outcome else {
            panic!("expected error");
        };
        assert_eq!(error.code, "SEQ_MISSING_SESSION");
        assert!(error.retryable);
    }

    #[tokio::test]
    async fn test_negative_sequence_is_validation_error() {
        let mut fx = fixture().await;
        let outcome = fx
            .processor
            .process(&mut fx.player, &move_intent(-1, Direction::East, 1))
            .await;
        let IntentOutcome::Error(error) = outcome else {
            panic!("expected error");
        };
        assert_eq!(error.code, "SEQ_INVALID");
        assert_eq!(error.category, ErrorCategory::Validation);
        assert!(!error.retryable);
    }

    // =====================================================================
    // Chat
    // =====================================================================

    #[tokio::test]
    async fn test_chat_applies_without_delta() {
        let mut fx = fixture().await;
        let outcome =
            fx.processor.process(&mut fx.player, &chat(1)).await;
        let IntentOutcome::Ack { ack, delta } = outcome else {
            panic!("expected ack");
        };
        assert_eq!(ack.status, AckStatus::Applied);
        assert!(delta.is_none());
    }

    #[tokio::test]
    async fn test_chat_rate_limit_blocks_sixth_message() {
        let mut fx = fixture().await;
        for seq in 1..=5 {
            let outcome =
                fx.processor.process(&mut fx.player, &chat(seq)).await;
            assert!(matches!(outcome, IntentOutcome::Ack { .. }));
        }

        let outcome = fx.processor.process(&mut fx.player, &chat(6)).await;
        let IntentOutcome::Error(error) = outcome else {
            panic!("expected rate limit error");
        };
        assert_eq!(error.code, "CHAT_RATE_LIMIT_EXCEEDED");
        assert_eq!(error.category, ErrorCategory::RateLimit);
        assert!(!error.retryable);
        assert!(error.message.contains("retry in"));

        // Sequence did not advance past 5.
        let session =
            fx.sessions.get(&SessionId::new("s-1")).await.unwrap();
        assert_eq!(session.last_sequence_number, 5);
    }

    #[tokio::test]
    async fn test_chat_window_reopens_after_interval() {
        let mut window = ChatWindow::default();
        for i in 0..5 {
            assert!(window.try_admit(1_000 + i).is_ok());
        }
        let retry = window.try_admit(2_000).unwrap_err();
        assert!(retry >= 1);
        // 10 s after the first admission the window has space again.
        assert!(window.try_admit(11_001).is_ok());
    }

    // =====================================================================
    // Generic action
    // =====================================================================

    #[tokio::test]
    async fn test_action_defaults_kind_to_system() {
        let mut fx = fixture().await;
        let outcome = fx
            .processor
            .process(
                &mut fx.player,
                &IntentEnvelope::Action(ActionIntent {
                    sequence: 1,
                    action_id: "a-1".into(),
                    kind: ActionKind::System,
                    target: None,
                    metadata: None,
                }),
            )
            .await;
        let IntentOutcome::Ack { ack, delta } = outcome else {
            panic!("expected ack");
        };
        assert_eq!(ack.status, AckStatus::Applied);
        let delta = delta.unwrap();
        assert_eq!(delta.effects[0].kind, "system");
        assert_eq!(delta.effects[0].action_id.as_deref(), Some("a-1"));
    }

    // =====================================================================
    // Persistence failures
    // =====================================================================

    #[tokio::test]
    async fn test_persist_failure_is_retryable_system_error() {
        let mut fx = fixture().await;
        fx.store.set_failing(true);
        let outcome = fx
            .processor
            .process(&mut fx.player, &move_intent(1, Direction::East, 1))
            .await;
        let IntentOutcome::Error(error) = outcome else {
            panic!("expected error");
        };
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert_eq!(error.category, ErrorCategory::System);
        assert!(error.retryable);

        // Nothing advanced and the position is untouched.
        assert_eq!(fx.player.profile.position, Position::ORIGIN);
        let session =
            fx.sessions.get(&SessionId::new("s-1")).await.unwrap();
        assert_eq!(session.last_sequence_number, 0);
    }

    #[tokio::test]
    async fn test_outage_fails_fast_after_threshold() {
        let mut fx = fixture().await;
        fx.store.set_failing(true);
        // The sequence never advances on failed persists, so the same
        // sequence number stays `accept` and keeps hitting the store.
        for _ in 0..3 {
            fx.processor
                .process(&mut fx.player, &move_intent(1, Direction::East, 1))
                .await;
        }
        // Circuit is open now: healing the store does not matter yet.
        fx.store.set_failing(false);
        let outcome = fx
            .processor
            .process(&mut fx.player, &move_intent(1, Direction::East, 1))
            .await;
        let IntentOutcome::Error(error) = outcome else {
            panic!("expected fast-fail error");
        };
        assert!(error.message.contains("database_unavailable"));
    }
}
