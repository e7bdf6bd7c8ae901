//! Error types for the session layer.

use tilemud_protocol::SessionId;
use tilemud_protocol::catalog::CatalogError;
use tilemud_store::StoreError;

/// Errors that can occur during session bootstrap, reconnect, and
/// lifecycle management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No `Authorization` header was supplied.
    #[error("authorization token missing")]
    AuthTokenMissing,

    /// The bearer token was rejected by the validator.
    #[error("authorization token invalid")]
    AuthTokenInvalid,

    /// The header is not `Bearer <token>`.
    #[error("authorization token has invalid format")]
    AuthTokenInvalidFormat,

    /// The bearer token was present but empty.
    #[error("authorization token empty")]
    AuthTokenEmpty,

    /// The reconnect token is unknown, already consumed, or expired.
    #[error("reconnect token invalid")]
    ReconnectTokenInvalid,

    /// The token resolved but its session no longer exists in memory.
    #[error("no session found for reconnect: {0}")]
    SessionNotFoundForReconnect(SessionId),

    /// No session exists for the given id.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// A cataloged failure (outage guard fast-fail, durable errors).
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// A raw store failure outside the guarded paths.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Whether this error is an authorization failure (HTTP 401 class).
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthTokenMissing
                | Self::AuthTokenInvalid
                | Self::AuthTokenInvalidFormat
                | Self::AuthTokenEmpty
        )
    }
}
