//! Per-session monotonic sequence evaluation.
//!
//! Every intent carries a sequence number; this service decides whether
//! it is the next expected one. Gaps schedule a pending snapshot (at
//! most one per session per TTL window) and publish a notification so
//! whichever component owns the client connection can push a resync.
//! The service itself never pushes state.
//!
//! Duplicate handling: only the acknowledged high-water mark is tracked,
//! so any sequence at or below it reports `Duplicate` (the out-of-order
//! case is folded in; callers ack duplicates idempotently).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use tilemud_protocol::SessionId;
use tilemud_store::clock::now_ms;

use crate::{Session, SessionError, SessionStore};

/// Default lifetime of a pending-snapshot request.
pub const DEFAULT_PENDING_SNAPSHOT_TTL_MS: u64 = 10_000;

/// Outcome of evaluating one intent's sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceEvaluation {
    /// Exactly `last + 1`: apply it.
    Accept,
    /// At or below the high-water mark: already applied, ack idempotently.
    Duplicate,
    /// Beyond `last + 1`: the client missed acks or we missed intents.
    Gap {
        /// Whether this evaluation newly scheduled a snapshot (false when
        /// one is already pending for the session).
        snapshot_scheduled: bool,
    },
    /// Negative sequence. No snapshot is scheduled.
    Invalid,
    /// Unknown session: a full resync snapshot is scheduled.
    MissingSession,
}

/// A scheduled snapshot request, published to subscribers.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub session_id: SessionId,
    pub requested_at: u64,
    /// True when the session itself is unknown and the client needs a
    /// full resync rather than a delta.
    pub requires_full_resync: bool,
}

#[derive(Debug, Clone)]
struct PendingSnapshot {
    scheduled_at: u64,
    requires_full_resync: bool,
}

/// Evaluates and advances per-session sequence numbers.
pub struct ActionSequenceService {
    sessions: Arc<SessionStore>,
    pending: Mutex<HashMap<SessionId, PendingSnapshot>>,
    ttl_ms: u64,
    notifications: broadcast::Sender<SnapshotRequest>,
}

impl ActionSequenceService {
    pub fn new(sessions: Arc<SessionStore>, pending_snapshot_ttl_ms: u64) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            sessions,
            pending: Mutex::new(HashMap::new()),
            ttl_ms: pending_snapshot_ttl_ms,
            notifications,
        }
    }

    /// Subscribes to snapshot-scheduling notifications. One notification
    /// per scheduling window per session.
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotRequest> {
        self.notifications.subscribe()
    }

    /// Classifies `sequence` against the session's high-water mark.
    pub async fn evaluate(
        &self,
        session_id: &SessionId,
        sequence: i64,
    ) -> SequenceEvaluation {
        if sequence < 0 {
            return SequenceEvaluation::Invalid;
        }

        let Some(session) = self.sessions.get(session_id).await else {
            self.schedule_snapshot(session_id, true);
            return SequenceEvaluation::MissingSession;
        };

        let last = session.last_sequence_number;
        if sequence == last + 1 {
            SequenceEvaluation::Accept
        } else if sequence <= last {
            SequenceEvaluation::Duplicate
        } else {
            let snapshot_scheduled = self.schedule_snapshot(session_id, false);
            tracing::debug!(
                %session_id,
                expected = last + 1,
                received = sequence,
                snapshot_scheduled,
                "sequence gap"
            );
            SequenceEvaluation::Gap { snapshot_scheduled }
        }
    }

    /// Advances the session's high-water mark (monotone) and clears any
    /// pending snapshot for it.
    pub async fn acknowledge(
        &self,
        session_id: &SessionId,
        sequence: i64,
    ) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .record_action_sequence(session_id, sequence)
            .await?;
        self.pending.lock().expect("pending lock").remove(session_id);
        Ok(session)
    }

    /// Overwrites the high-water mark (floored at zero) and clears any
    /// pending snapshot.
    pub async fn reset_sequence(
        &self,
        session_id: &SessionId,
        value: i64,
    ) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .reset_action_sequence(session_id, value)
            .await?;
        self.pending.lock().expect("pending lock").remove(session_id);
        Ok(session)
    }

    /// The live pending snapshot for a session, if any. Expired entries
    /// behave as absent (and are dropped).
    pub fn pending_snapshot(
        &self,
        session_id: &SessionId,
    ) -> Option<SnapshotRequest> {
        let mut pending = self.pending.lock().expect("pending lock");
        let now = now_ms();
        let entry = pending.get(session_id).cloned();
        match entry {
            Some(entry) if now < entry.scheduled_at + self.ttl_ms => {
                Some(SnapshotRequest {
                    session_id: session_id.clone(),
                    requested_at: entry.scheduled_at,
                    requires_full_resync: entry.requires_full_resync,
                })
            }
            Some(_) => {
                pending.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Schedules a snapshot unless one is already live for the session.
    /// Returns whether a new one was scheduled.
    fn schedule_snapshot(
        &self,
        session_id: &SessionId,
        requires_full_resync: bool,
    ) -> bool {
        let now = now_ms();
        let mut pending = self.pending.lock().expect("pending lock");
        if let Some(existing) = pending.get(session_id) {
            if now < existing.scheduled_at + self.ttl_ms {
                return false;
            }
        }
        pending.insert(
            session_id.clone(),
            PendingSnapshot {
                scheduled_at: now,
                requires_full_resync,
            },
        );
        drop(pending);
        let _ = self.notifications.send(SnapshotRequest {
            session_id: session_id.clone(),
            requested_at: now,
            requires_full_resync,
        });
        true
    }
}
