//! Session types: the server's record of a connected identity.

use serde::{Deserialize, Serialize};

use tilemud_protocol::{CharacterId, SessionId, UserId};

/// Lifecycle state of a session.
///
/// ```text
/// Pending ──(room join)──→ Active ──(unexpected disconnect)──→ Grace
///    ▲                        ▲                                  │
///    │                        └────────(resume in window)────────┘
///    │                                                           │
/// (bootstrap)            Terminating ──→ Terminated ◄──(window elapsed)
/// ```
///
/// - **Pending**: bootstrapped, no realtime binding yet.
/// - **Active**: bound to a live socket.
/// - **Grace**: socket lost; a resume within the grace window restores
///   Active.
/// - **Terminating**: consented leave in progress.
/// - **Terminated**: gone; a new bootstrap is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Grace,
    Terminating,
    Terminated,
}

/// One identity's session. Exactly one active realtime binding exists per
/// session id at any moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub character_id: CharacterId,
    /// Server-assigned at bootstrap; used when the client omits its own
    /// version on join.
    pub protocol_version: String,
    pub status: SessionStatus,
    /// Monotonically non-decreasing high-water mark of acknowledged
    /// intents.
    pub last_sequence_number: i64,
    pub last_heartbeat_at: u64,
    pub reconnect_attempts: u32,
    pub created_at: u64,
}

/// Fields supplied when opening (or re-opening) a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub character_id: CharacterId,
    pub protocol_version: String,
    pub status: SessionStatus,
    pub last_sequence_number: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Terminating).unwrap(),
            "\"terminating\""
        );
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = Session {
            session_id: SessionId::new("s-1"),
            user_id: UserId::new("u-1"),
            character_id: CharacterId::new("c-1"),
            protocol_version: "1.0.0".into(),
            status: SessionStatus::Active,
            last_sequence_number: 3,
            last_heartbeat_at: 10,
            reconnect_attempts: 0,
            created_at: 5,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["lastSequenceNumber"], 3);
        assert_eq!(json["status"], "active");
    }
}
