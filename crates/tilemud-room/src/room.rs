//! Room actor: an isolated task hosting one realtime instance.
//!
//! Each room runs in its own task and owns its connected-player map.
//! The outside world (connection handlers) talks to it through an mpsc
//! command channel with oneshot replies; outbound events flow through
//! per-player unbounded senders the handlers drain into their sockets.
//!
//! Ordering guarantee: for any intent that produces a state delta, the
//! origin player's sends (ack, then delta) happen before the delta fans
//! out to peers.

use std::collections::HashMap;
use std::time::Duration;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use tilemud_protocol::catalog::{self, CatalogError, ErrorCategory};
use tilemud_protocol::{
    CLOSE_AUTH_FAILURE, CLOSE_VERSION_MISMATCH, ErrorPayload,
    EventEnvelope, HandshakeAck, InstanceId, IntentEnvelope, JsonMap,
    Position, RoomJoinRequest, SessionId, StateDeltaPayload,
    VersionMismatchPayload, VersionService, WorldSnapshot,
};
use tilemud_session::{
    ActionSequenceService, ProfileService, Session, SessionStatus,
    SessionStore, snapshot_of,
};
use tilemud_store::clock::now_ms;
use tilemud_store::{
    ActionDurabilityService, DegradedSignalService, DurableStore,
    HealthTransition, KvStore,
};

use crate::grace::{ReconnectAttempt, ReconnectSessionManager};
use crate::intents::{IntentOutcome, IntentProcessor, PlayerState};
use crate::{RoomConfig, RoomError};

/// Close code for capacity/transient rejections: "try again later".
const CLOSE_TRY_AGAIN: u16 = 1013;
/// Close code for server-side faults during join.
const CLOSE_INTERNAL: u16 = 1011;

/// Outbound channel for one player's events.
pub type PlayerSender = mpsc::UnboundedSender<EventEnvelope>;

/// Successful join: the session as of registration.
#[derive(Debug, Clone)]
pub struct JoinAccepted {
    pub session: Session,
}

/// Rejected join: what to tell the client and how to close the socket.
#[derive(Debug, Clone)]
pub struct JoinRejection {
    pub event: EventEnvelope,
    pub close_code: u16,
    pub close_reason: String,
    /// Delay between sending `event` and closing, so the event flushes.
    pub flush_delay: Option<Duration>,
}

/// The result a connection handler acts on.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Accepted(JoinAccepted),
    Rejected(JoinRejection),
}

/// A snapshot of room occupancy.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub instance_id: InstanceId,
    pub client_count: usize,
    pub max_clients: usize,
}

pub(crate) enum RoomCommand {
    Join {
        request: RoomJoinRequest,
        sender: PlayerSender,
        reply: oneshot::Sender<JoinOutcome>,
    },
    Intent {
        session_id: SessionId,
        intent: IntentEnvelope,
    },
    Leave {
        session_id: SessionId,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Disconnect {
        session_id: SessionId,
    },
    GetInfo {
        reply: oneshot::Sender<RoomInfo>,
    },
    Shutdown,
}

/// Handle to a running room actor. Cheap to clone.
#[derive(Clone)]
pub struct RoomHandle {
    instance_id: InstanceId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Runs the join handshake for a new socket.
    pub async fn join(
        &self,
        request: RoomJoinRequest,
        sender: PlayerSender,
    ) -> Result<JoinOutcome, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Join {
                request,
                sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))
    }

    /// Dispatches an intent from a connected player (fire-and-forget;
    /// the outcome arrives on the player's event channel).
    pub async fn intent(
        &self,
        session_id: SessionId,
        intent: IntentEnvelope,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Intent { session_id, intent })
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))
    }

    /// Consented leave: deregisters the player and marks the session
    /// terminating.
    pub async fn leave(
        &self,
        session_id: SessionId,
    ) -> Result<(), RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Leave {
                session_id,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))?
    }

    /// Unexpected disconnect: parks the player in the grace store.
    pub async fn disconnect(
        &self,
        session_id: SessionId,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Disconnect { session_id })
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::GetInfo { reply: reply_tx })
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))
    }

    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable(self.instance_id.clone()))
    }
}

/// Everything a room needs from the lower layers.
pub struct RoomServices<K: KvStore, D: DurableStore> {
    pub sessions: Arc<SessionStore>,
    pub sequence: Arc<ActionSequenceService>,
    pub durability: Arc<ActionDurabilityService<D>>,
    pub profiles: Arc<ProfileService<D>>,
    pub health: Arc<DegradedSignalService>,
    pub version: Arc<VersionService>,
    pub grace: Arc<ReconnectSessionManager<K>>,
}

struct ConnectedPlayer {
    sender: PlayerSender,
    state: PlayerState,
    joined_at: u64,
    last_intent_at: u64,
}

struct RoomActor<K: KvStore, D: DurableStore> {
    config: RoomConfig,
    sessions: Arc<SessionStore>,
    processor: IntentProcessor<D>,
    profiles: Arc<ProfileService<D>>,
    health: Arc<DegradedSignalService>,
    version: Arc<VersionService>,
    grace: Arc<ReconnectSessionManager<K>>,
    players: HashMap<SessionId, ConnectedPlayer>,
    receiver: mpsc::Receiver<RoomCommand>,
    health_rx: broadcast::Receiver<HealthTransition>,
}

impl<K: KvStore, D: DurableStore> RoomActor<K, D> {
    async fn run(mut self) {
        tracing::info!(
            instance_id = %self.config.instance_id,
            "room actor started"
        );

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(RoomCommand::Join { request, sender, reply }) => {
                            let outcome =
                                self.handle_join(request, sender).await;
                            let _ = reply.send(outcome);
                        }
                        Some(RoomCommand::Intent { session_id, intent }) => {
                            self.handle_intent(session_id, intent).await;
                        }
                        Some(RoomCommand::Leave { session_id, reply }) => {
                            let result =
                                self.handle_leave(session_id).await;
                            let _ = reply.send(result);
                        }
                        Some(RoomCommand::Disconnect { session_id }) => {
                            self.handle_disconnect(session_id).await;
                        }
                        Some(RoomCommand::GetInfo { reply }) => {
                            let _ = reply.send(self.info());
                        }
                        Some(RoomCommand::Shutdown) | None => {
                            tracing::info!(
                                instance_id = %self.config.instance_id,
                                "room shutting down"
                            );
                            break;
                        }
                    }
                }
                transition = self.health_rx.recv() => {
                    match transition {
                        Ok(transition) => {
                            self.broadcast(EventEnvelope::Degraded(
                                transition.to_payload(),
                            ));
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(
                                missed,
                                "degraded signal receiver lagged"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        tracing::info!(
            instance_id = %self.config.instance_id,
            "room actor stopped"
        );
    }

    // -- Join handshake ---------------------------------------------------

    async fn handle_join(
        &mut self,
        request: RoomJoinRequest,
        sender: PlayerSender,
    ) -> JoinOutcome {
        let now = now_ms();

        let Some(session) = self.sessions.get(&request.session_id).await
        else {
            return reject_auth(
                "SESSION_NOT_FOUND",
                "no session for the supplied id; bootstrap first",
                "session_not_found",
            );
        };

        if session.user_id != request.user_id {
            tracing::warn!(
                session_id = %session.session_id,
                claimed = %request.user_id,
                owner = %session.user_id,
                "join user mismatch"
            );
            return reject_auth(
                "SESSION_USER_MISMATCH",
                "session belongs to a different user",
                "session_user_mismatch",
            );
        }

        if !self.players.contains_key(&request.session_id)
            && self.players.len() >= self.config.max_clients
        {
            let err =
                CatalogError::from_reason(catalog::INSTANCE_CAPACITY_EXCEEDED)
                    .with_detail(self.config.instance_id.as_str().to_string());
            return JoinOutcome::Rejected(JoinRejection {
                event: EventEnvelope::Error(ErrorPayload::from_catalog(
                    &err,
                )),
                close_code: CLOSE_TRY_AGAIN,
                close_reason: "instance_capacity_exceeded".into(),
                flush_delay: None,
            });
        }

        if self
            .sessions
            .record_heartbeat(&session.session_id, now)
            .await
            .is_err()
            || self
                .sessions
                .set_status(&session.session_id, SessionStatus::Active)
                .await
                .is_err()
        {
            return reject_internal("session update failed during join");
        }

        let effective_version = request
            .client_version
            .as_deref()
            .unwrap_or(session.protocol_version.as_str());
        let check = self.version.check(Some(effective_version));
        if !check.compatible {
            let delay = self.config.version_mismatch_flush_delay;
            return JoinOutcome::Rejected(JoinRejection {
                event: EventEnvelope::VersionMismatch(
                    VersionMismatchPayload {
                        expected_version: check.expected,
                        received_version: check
                            .received
                            .unwrap_or_default(),
                        disconnect_at: Some(now + delay.as_millis() as u64),
                        message: Some(check.message),
                    },
                ),
                close_code: CLOSE_VERSION_MISMATCH,
                close_reason: "version_mismatch".into(),
                flush_delay: Some(delay),
            });
        }

        let mut profile = match self
            .profiles
            .ensure(&session.character_id, &session.user_id)
            .await
        {
            Ok(profile) => profile,
            Err(e) => {
                return JoinOutcome::Rejected(JoinRejection {
                    event: EventEnvelope::Error(
                        ErrorPayload::from_catalog(&e),
                    ),
                    close_code: CLOSE_INTERNAL,
                    close_reason: "profile_unavailable".into(),
                    flush_delay: None,
                });
            }
        };

        // Resume in-room state parked during a grace window, if any.
        match self
            .grace
            .attempt_reconnect(
                &session.user_id,
                &self.config.instance_id,
                session.session_id.clone(),
            )
            .await
        {
            Ok(ReconnectAttempt::Resumed(parked)) => {
                if let Some(position) = parked
                    .player_state
                    .get("position")
                    .and_then(|v| {
                        serde_json::from_value::<Position>(v.clone()).ok()
                    })
                {
                    profile.position = position;
                }
                let _ = self
                    .grace
                    .remove_session(
                        &session.user_id,
                        &self.config.instance_id,
                    )
                    .await;
                tracing::info!(
                    session_id = %session.session_id,
                    "resumed parked player state"
                );
            }
            Ok(ReconnectAttempt::NewSessionRequired { .. }) => {}
            Err(e) => {
                tracing::warn!(error = %e, "grace lookup failed on join");
            }
        }

        // Refresh the snapshot after the mutations above.
        let session = self
            .sessions
            .get(&session.session_id)
            .await
            .unwrap_or(session);

        // Origin-first ordering starts here: handshake ack, initial
        // delta, then the degraded snapshot, all before registration
        // makes the player eligible for peer fanout.
        let handshake = EventEnvelope::Ack(
            tilemud_protocol::AckPayload::Handshake(HandshakeAck::new(
                session.session_id.clone(),
                session.last_sequence_number,
                self.version.current(),
                now,
            )),
        );
        let initial_delta = EventEnvelope::StateDelta(StateDeltaPayload {
            sequence: session.last_sequence_number,
            issued_at: now,
            character: Some(snapshot_of(&profile)),
            world: Some(WorldSnapshot::default()),
            effects: Vec::new(),
            reconnect_token: None,
        });
        if sender.send(handshake).is_err()
            || sender.send(initial_delta).is_err()
        {
            return reject_internal("client channel closed during join");
        }
        for degraded in self.health.snapshot() {
            let _ = sender.send(EventEnvelope::Degraded(degraded));
        }

        let state = PlayerState::new(
            session.session_id.clone(),
            session.user_id.clone(),
            profile,
        );
        self.players.insert(
            session.session_id.clone(),
            ConnectedPlayer {
                sender,
                state,
                joined_at: now,
                last_intent_at: now,
            },
        );
        tracing::info!(
            instance_id = %self.config.instance_id,
            session_id = %session.session_id,
            players = self.players.len(),
            "player joined"
        );

        JoinOutcome::Accepted(JoinAccepted { session })
    }

    // -- Intent dispatch --------------------------------------------------

    async fn handle_intent(
        &mut self,
        session_id: SessionId,
        intent: IntentEnvelope,
    ) {
        let arrival = now_ms();
        let Some(player) = self.players.get_mut(&session_id) else {
            tracing::warn!(
                %session_id,
                "intent from unregistered session, ignoring"
            );
            return;
        };
        player.last_intent_at = arrival;
        let origin = player.sender.clone();

        if let Err(detail) = intent.validate() {
            let _ = origin.send(EventEnvelope::Error(
                ErrorPayload::new(
                    "INTENT_PAYLOAD_INVALID",
                    ErrorCategory::Validation,
                    false,
                    detail,
                )
                .for_intent(intent.intent_type(), intent.sequence()),
            ));
            return;
        }

        let outcome =
            self.processor.process(&mut player.state, &intent).await;
        let latency = now_ms().saturating_sub(arrival);

        match outcome {
            IntentOutcome::Ack { mut ack, delta } => {
                ack.latency_ms = Some(latency);
                let _ = origin.send(EventEnvelope::Ack(
                    tilemud_protocol::AckPayload::Intent(ack),
                ));
                if let Some(delta) = delta {
                    let event = EventEnvelope::StateDelta(delta);
                    // Origin first, then peers.
                    let _ = origin.send(event.clone());
                    self.broadcast_except(&session_id, event);
                }
            }
            IntentOutcome::Error(error) => {
                let _ = origin.send(EventEnvelope::Error(error));
            }
        }
    }

    // -- Leave / disconnect -----------------------------------------------

    async fn handle_leave(
        &mut self,
        session_id: SessionId,
    ) -> Result<(), RoomError> {
        let Some(player) = self.players.remove(&session_id) else {
            return Err(RoomError::NotInRoom(session_id));
        };
        let _ = self
            .sessions
            .set_status(&session_id, SessionStatus::Terminating)
            .await;
        // Consented leave cancels any parked grace state.
        let _ = self
            .grace
            .remove_session(
                &player.state.user_id,
                &self.config.instance_id,
            )
            .await;
        tracing::info!(
            instance_id = %self.config.instance_id,
            %session_id,
            players = self.players.len(),
            connected_ms = now_ms().saturating_sub(player.joined_at),
            "player left"
        );
        Ok(())
    }

    async fn handle_disconnect(&mut self, session_id: SessionId) {
        let Some(player) = self.players.remove(&session_id) else {
            return;
        };
        let _ = self
            .sessions
            .set_status(&session_id, SessionStatus::Grace)
            .await;

        let mut player_state = JsonMap::new();
        if let Ok(position) =
            serde_json::to_value(player.state.profile.position)
        {
            player_state.insert("position".into(), position);
        }
        if let Err(e) = self
            .grace
            .create_session(
                player.state.user_id.clone(),
                self.config.instance_id.clone(),
                session_id.clone(),
                player_state,
                Some(self.config.grace_period_ms),
                None,
            )
            .await
        {
            tracing::warn!(
                %session_id,
                error = %e,
                "failed to park grace session"
            );
        }
        tracing::info!(
            instance_id = %self.config.instance_id,
            %session_id,
            grace_period_ms = self.config.grace_period_ms,
            idle_ms = now_ms().saturating_sub(player.last_intent_at),
            "player disconnected, grace window started"
        );
    }

    // -- Fanout -----------------------------------------------------------

    fn broadcast(&self, event: EventEnvelope) {
        for player in self.players.values() {
            let _ = player.sender.send(event.clone());
        }
    }

    fn broadcast_except(&self, excluded: &SessionId, event: EventEnvelope) {
        for (session_id, player) in &self.players {
            if session_id != excluded {
                let _ = player.sender.send(event.clone());
            }
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            instance_id: self.config.instance_id.clone(),
            client_count: self.players.len(),
            max_clients: self.config.max_clients,
        }
    }
}

fn reject_auth(
    code: &str,
    message: &str,
    close_reason: &str,
) -> JoinOutcome {
    JoinOutcome::Rejected(JoinRejection {
        event: EventEnvelope::Error(ErrorPayload::new(
            code,
            ErrorCategory::Auth,
            false,
            message,
        )),
        close_code: CLOSE_AUTH_FAILURE,
        close_reason: close_reason.into(),
        flush_delay: None,
    })
}

fn reject_internal(message: &str) -> JoinOutcome {
    JoinOutcome::Rejected(JoinRejection {
        event: EventEnvelope::Error(ErrorPayload::new(
            "INTERNAL_ERROR",
            ErrorCategory::System,
            true,
            message,
        )),
        close_code: CLOSE_INTERNAL,
        close_reason: "internal_error".into(),
        flush_delay: None,
    })
}

/// Spawns a room actor task and returns its handle.
pub fn spawn_room<K: KvStore, D: DurableStore>(
    config: RoomConfig,
    services: RoomServices<K, D>,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(config.channel_size);
    let instance_id = config.instance_id.clone();

    let actor = RoomActor {
        health_rx: services.health.subscribe(),
        processor: IntentProcessor::new(
            services.sequence,
            services.durability,
        ),
        sessions: services.sessions,
        profiles: services.profiles,
        health: services.health,
        version: services.version,
        grace: services.grace,
        players: HashMap::new(),
        receiver: rx,
        config,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        instance_id,
        sender: tx,
    }
}
