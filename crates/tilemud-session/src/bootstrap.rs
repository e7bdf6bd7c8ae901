//! Session bootstrap: bearer token in, live session + reconnect token out.
//!
//! This is the HTTP entry point's backing service. It validates identity,
//! optionally consumes a prior reconnect token (carrying the sequence
//! high-water mark forward), lazily creates the character profile, opens
//! the session, and issues a fresh reconnect token.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tilemud_protocol::{
    CharacterId, CharacterSnapshot, ReconnectTokenRef, SessionId, UserId,
    WorldSnapshot,
};
use tilemud_store::clock::now_ms;
use tilemud_store::{DurableStore, KvStore};

use crate::profiles::{ProfileService, snapshot_of};
use crate::{
    ReconnectTokenStore, SessionError, SessionStatus, SessionStore,
    TokenValidator, session::NewSession,
};

/// Inputs to a bootstrap attempt.
#[derive(Debug, Clone, Default)]
pub struct BootstrapRequest {
    /// The raw `Authorization` header value, if any.
    pub authorization: Option<String>,
    pub reconnect_token: Option<String>,
    pub client_version: Option<String>,
}

/// The session summary returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub status: SessionStatus,
    pub protocol_version: String,
    pub last_sequence_number: i64,
}

/// Initial game state shipped with the bootstrap response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapState {
    pub character: CharacterSnapshot,
    pub world: WorldSnapshot,
}

/// Where to connect for realtime traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInfo {
    pub room: String,
}

/// The full bootstrap response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub version: String,
    pub issued_at: u64,
    pub session: SessionSummary,
    pub state: BootstrapState,
    pub reconnect: ReconnectTokenRef,
    pub realtime: RealtimeInfo,
}

/// Opens sessions for authenticated users.
pub struct SessionBootstrapService<K, D, A>
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    validator: A,
    sessions: Arc<SessionStore>,
    tokens: Arc<ReconnectTokenStore<K>>,
    profiles: Arc<ProfileService<D>>,
    protocol_version: String,
    room_name: String,
}

impl<K, D, A> SessionBootstrapService<K, D, A>
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    pub fn new(
        validator: A,
        sessions: Arc<SessionStore>,
        tokens: Arc<ReconnectTokenStore<K>>,
        profiles: Arc<ProfileService<D>>,
        protocol_version: impl Into<String>,
        room_name: impl Into<String>,
    ) -> Self {
        Self {
            validator,
            sessions,
            tokens,
            profiles,
            protocol_version: protocol_version.into(),
            room_name: room_name.into(),
        }
    }

    pub async fn bootstrap(
        &self,
        request: BootstrapRequest,
    ) -> Result<BootstrapResponse, SessionError> {
        let user_id = self
            .validator
            .validate(request.authorization.as_deref())
            .await?;

        // A prior reconnect token carries the sequence high-water mark
        // into the new session; an invalid one just means a fresh start.
        let prior = match &request.reconnect_token {
            Some(token) => {
                let consumed = self.tokens.consume(token).await?;
                if let Some(payload) = &consumed {
                    self.sessions.remove(&payload.session_id).await;
                }
                consumed
            }
            None => None,
        };

        let character_id = CharacterId::for_user(&user_id);
        let profile =
            self.profiles.ensure(&character_id, &user_id).await?;

        let session = self
            .sessions
            .create_or_update(NewSession {
                session_id: SessionId::generate(),
                user_id: user_id.clone(),
                character_id,
                protocol_version: self.protocol_version.clone(),
                status: SessionStatus::Active,
                last_sequence_number: prior
                    .map(|p| p.last_sequence_number)
                    .unwrap_or(0),
            })
            .await;

        let token = self
            .tokens
            .issue(
                session.session_id.clone(),
                session.last_sequence_number,
                None,
            )
            .await?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            "session bootstrapped"
        );

        Ok(BootstrapResponse {
            version: self.protocol_version.clone(),
            issued_at: now_ms(),
            session: SessionSummary {
                session_id: session.session_id,
                user_id: session.user_id,
                status: session.status,
                protocol_version: session.protocol_version,
                last_sequence_number: session.last_sequence_number,
            },
            state: BootstrapState {
                character: snapshot_of(&profile),
                world: WorldSnapshot::default(),
            },
            reconnect: token.to_ref(),
            realtime: RealtimeInfo {
                room: self.room_name.clone(),
            },
        })
    }
}
