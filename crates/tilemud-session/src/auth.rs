//! Bearer-token validation hook.
//!
//! The core does not implement authentication; it defines the
//! [`TokenValidator`] seam and ships [`DevTokenValidator`], which accepts
//! `Bearer <userId>` for development. Production deployments plug in a
//! JWT (or auth-service) validator behind the same trait.

use tilemud_protocol::UserId;

use crate::SessionError;

/// Validates an `Authorization` header value and returns the caller's
/// identity.
pub trait TokenValidator: Send + Sync + 'static {
    /// # Errors
    /// - [`SessionError::AuthTokenMissing`] — no header at all
    /// - [`SessionError::AuthTokenInvalidFormat`] — not `Bearer <token>`
    /// - [`SessionError::AuthTokenEmpty`] — bearer token is blank
    /// - [`SessionError::AuthTokenInvalid`] — token rejected
    fn validate(
        &self,
        authorization: Option<&str>,
    ) -> impl Future<Output = Result<UserId, SessionError>> + Send;
}

/// Development validator: the bearer token IS the user id.
/// Never deploy this outside local development.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevTokenValidator;

impl TokenValidator for DevTokenValidator {
    async fn validate(
        &self,
        authorization: Option<&str>,
    ) -> Result<UserId, SessionError> {
        let Some(header) = authorization else {
            return Err(SessionError::AuthTokenMissing);
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Err(SessionError::AuthTokenInvalidFormat);
        };
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::AuthTokenEmpty);
        }
        Ok(UserId::new(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepts_bearer_user_id() {
        let user = DevTokenValidator
            .validate(Some("Bearer u-42"))
            .await
            .unwrap();
        assert_eq!(user, UserId::new("u-42"));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let err = DevTokenValidator.validate(None).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthTokenMissing));
    }

    #[tokio::test]
    async fn test_wrong_scheme() {
        let err = DevTokenValidator
            .validate(Some("Basic dXNlcg=="))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AuthTokenInvalidFormat));
    }

    #[tokio::test]
    async fn test_empty_token() {
        let err = DevTokenValidator
            .validate(Some("Bearer   "))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AuthTokenEmpty));
    }

    #[tokio::test]
    async fn test_all_auth_errors_are_auth_failures() {
        for header in [None, Some("Nope"), Some("Bearer ")] {
            let err = DevTokenValidator.validate(header).await.unwrap_err();
            assert!(err.is_auth_failure(), "{header:?}");
        }
    }
}
