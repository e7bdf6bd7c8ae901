//! HTTP surface: session bootstrap, resume, and version probe.
//!
//! Status mapping: 401 for authorization failures, 400 for malformed or
//! rejected input, 503 while the DB outage guard is tripped (the
//! response carries `Retry-After` semantics in the body), 200 otherwise.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use tilemud_protocol::catalog::{self, CatalogError};
use tilemud_protocol::{CharacterSnapshot, ReconnectTokenRef};
use tilemud_session::{
    BootstrapRequest, DeltaReplay, ReconnectRequest, ReplayMode, Session,
    SessionError, TokenValidator,
};
use tilemud_store::{DurableStore, KvStore};

use crate::server::ServerState;

const CLIENT_VERSION_HEADER: &str = "x-client-version";

pub(crate) fn router<K, D, A>(state: Arc<ServerState<K, D, A>>) -> Router
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    Router::new()
        .route("/api/session/bootstrap", post(bootstrap::<K, D, A>))
        .route("/api/session/resume", post(resume::<K, D, A>))
        .route("/api/version", get(version::<K, D, A>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request/response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapBody {
    reconnect_token: Option<String>,
    client_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeBody {
    reconnect_token: String,
    client_sequence: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResumeResponseBody {
    session: Session,
    last_sequence_number: i64,
    reconnect: ReconnectTokenRef,
    mode: ReplayMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<DeltaReplay>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<CharacterSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionBody {
    version: String,
    protocol: String,
    updated_at: u64,
    supported_versions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    reason: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn bootstrap<K, D, A>(
    State(state): State<Arc<ServerState<K, D, A>>>,
    headers: HeaderMap,
    body: Result<Json<BootstrapBody>, JsonRejection>,
) -> Response
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    let body = match body {
        Ok(Json(body)) => body,
        // A bodyless POST is a plain bootstrap; malformed JSON is not.
        Err(JsonRejection::MissingJsonContentType(_)) => {
            BootstrapBody::default()
        }
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: ErrorDetail {
                        reason: "malformed_body".into(),
                        message: rejection.to_string(),
                        retry_after_seconds: None,
                    },
                }),
            )
                .into_response();
        }
    };
    let request = BootstrapRequest {
        authorization: header_string(&headers, header::AUTHORIZATION.as_str()),
        reconnect_token: body.reconnect_token,
        client_version: body
            .client_version
            .or_else(|| header_string(&headers, CLIENT_VERSION_HEADER)),
    };

    match state.bootstrap.bootstrap(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => session_error_response(e),
    }
}

async fn resume<K, D, A>(
    State(state): State<Arc<ServerState<K, D, A>>>,
    body: Json<ResumeBody>,
) -> Response
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    let Json(body) = body;
    let result = state
        .reconnect
        .resume(ReconnectRequest {
            reconnect_token: body.reconnect_token,
            client_sequence: body.client_sequence,
        })
        .await;

    match result {
        Ok(response) => (
            StatusCode::OK,
            Json(ResumeResponseBody {
                session: response.session,
                last_sequence_number: response.last_sequence_number,
                reconnect: response.reconnect,
                mode: response.mode,
                delta: response.delta,
                snapshot: response.snapshot,
            }),
        )
            .into_response(),
        Err(e) => session_error_response(e),
    }
}

async fn version<K, D, A>(
    State(state): State<Arc<ServerState<K, D, A>>>,
) -> Json<VersionBody>
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    Json(VersionBody {
        version: state.version.current(),
        protocol: state.version.protocol().to_string(),
        updated_at: state.started_at,
        supported_versions: state.version.supported(),
    })
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn session_error_response(err: SessionError) -> Response {
    let (status, reason, retry_after, message) = match &err {
        SessionError::AuthTokenMissing
        | SessionError::AuthTokenInvalid
        | SessionError::AuthTokenInvalidFormat
        | SessionError::AuthTokenEmpty => (
            StatusCode::UNAUTHORIZED,
            auth_reason(&err).to_string(),
            None,
            err.to_string(),
        ),
        SessionError::ReconnectTokenInvalid => (
            StatusCode::UNAUTHORIZED,
            "reconnect_token_invalid".into(),
            None,
            err.to_string(),
        ),
        SessionError::SessionNotFoundForReconnect(_)
        | SessionError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            "session_not_found".into(),
            None,
            err.to_string(),
        ),
        SessionError::Catalog(e) => catalog_status(e),
        SessionError::Store(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            catalog::INTERNAL_ERROR.into(),
            None,
            err.to_string(),
        ),
    };
    tracing::debug!(%reason, %message, "http request rejected");
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail {
                reason,
                message,
                retry_after_seconds: retry_after,
            },
        }),
    )
        .into_response()
}

fn catalog_status(
    e: &CatalogError,
) -> (StatusCode, String, Option<u64>, String) {
    let status = if e.reason() == catalog::INTERNAL_ERROR {
        // Outage-guard fast fails and other internal faults.
        StatusCode::SERVICE_UNAVAILABLE
    } else if e.reason() == catalog::RATE_LIMIT_EXCEEDED {
        StatusCode::TOO_MANY_REQUESTS
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        e.reason().to_string(),
        e.retry_after_seconds(),
        e.message(),
    )
}

fn auth_reason(err: &SessionError) -> &'static str {
    match err {
        SessionError::AuthTokenMissing => "authorization_token_missing",
        SessionError::AuthTokenInvalid => "authorization_token_invalid",
        SessionError::AuthTokenInvalidFormat => {
            "authorization_token_invalid_format"
        }
        SessionError::AuthTokenEmpty => "authorization_token_empty",
        _ => "authorization_failed",
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
