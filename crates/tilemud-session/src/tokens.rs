//! Reconnect token store: single-use tokens binding a session to its
//! last-acknowledged sequence.
//!
//! Tokens are 128-bit random hex strings, stored server-side in the KV
//! store under `reconnect:token:<token>` with a TTL. Consumption is an
//! atomic delete-on-read, which is what makes them single-use.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use tilemud_protocol::{ReconnectTokenRef, SessionId};
use tilemud_store::clock::now_ms;
use tilemud_store::{KvStore, StoreError};

const KEY_PREFIX: &str = "reconnect:token:";

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 300;

/// The server-side payload a token resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectTokenPayload {
    pub token: String,
    pub session_id: SessionId,
    pub last_sequence_number: i64,
    pub issued_at: u64,
    pub expires_at: u64,
}

impl ReconnectTokenPayload {
    /// The client-facing reference (token value + expiry only).
    pub fn to_ref(&self) -> ReconnectTokenRef {
        ReconnectTokenRef {
            token: self.token.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Issues and consumes reconnect tokens over the shared KV store.
pub struct ReconnectTokenStore<K: KvStore> {
    kv: Arc<K>,
    default_ttl_seconds: u64,
}

impl<K: KvStore> ReconnectTokenStore<K> {
    pub fn new(kv: Arc<K>, default_ttl_seconds: u64) -> Self {
        Self {
            kv,
            default_ttl_seconds,
        }
    }

    /// Issues a fresh token bound to `(session_id, last_sequence_number)`.
    pub async fn issue(
        &self,
        session_id: SessionId,
        last_sequence_number: i64,
        ttl_seconds: Option<u64>,
    ) -> Result<ReconnectTokenPayload, StoreError> {
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let issued_at = now_ms();
        let payload = ReconnectTokenPayload {
            token: generate_token(),
            session_id,
            last_sequence_number,
            issued_at,
            expires_at: issued_at + ttl * 1000,
        };
        let json = serde_json::to_string(&payload)
            .map_err(|e| StoreError::Kv(e.to_string()))?;
        self.kv
            .put(
                &format!("{KEY_PREFIX}{}", payload.token),
                json,
                Some(Duration::from_secs(ttl)),
            )
            .await?;
        tracing::debug!(
            session_id = %payload.session_id,
            expires_at = payload.expires_at,
            "reconnect token issued"
        );
        Ok(payload)
    }

    /// Consumes a token: returns its payload and deletes it atomically.
    /// Unknown, expired, or corrupt tokens all read as `None`.
    pub async fn consume(
        &self,
        token: &str,
    ) -> Result<Option<ReconnectTokenPayload>, StoreError> {
        let key = format!("{KEY_PREFIX}{token}");
        let Some(json) = self.kv.take(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ReconnectTokenPayload>(&json) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt reconnect token payload");
                Ok(None)
            }
        }
    }
}

/// 32-character hex string (128 bits of entropy). Guessing one is
/// infeasible; possession of the string is the credential.
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
