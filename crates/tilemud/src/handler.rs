//! Per-connection WebSocket handler: join handshake, then the intent
//! read loop, with a writer task draining room events to the socket.
//!
//! Close discipline: a clean client close is a consented leave; an
//! abrupt error starts the grace window. Server-initiated closes send
//! `event.disconnect` mirroring the close code first.

use std::sync::Arc;
use std::time::Duration;

use tilemud_protocol::catalog::ErrorCategory;
use tilemud_protocol::{
    Codec, DisconnectPayload, ErrorPayload, EventEnvelope, SessionId,
};
use tilemud_room::JoinOutcome;
use tilemud_session::TokenValidator;
use tilemud_store::{DurableStore, KvStore};
use tilemud_transport::{Connection, WebSocketConnection};

use crate::server::ServerState;
use crate::ServerError;

/// Close code for protocol violations (malformed join/intent frames).
const CLOSE_PROTOCOL_ERROR: u16 = 1002;

const JOIN_DEADLINE: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) async fn handle_connection<K, D, A>(
    conn: WebSocketConnection,
    state: Arc<ServerState<K, D, A>>,
) -> Result<(), ServerError>
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- First frame: the join payload, within the deadline. ---
    let data = match tokio::time::timeout(JOIN_DEADLINE, conn.recv()).await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            tracing::debug!(%conn_id, "closed before join");
            return Ok(());
        }
        Ok(Err(e)) => return Err(ServerError::Transport(e)),
        Err(_) => {
            send_event(
                &state,
                &conn,
                &EventEnvelope::Error(ErrorPayload::new(
                    "JOIN_TIMEOUT",
                    ErrorCategory::Validation,
                    false,
                    "join payload not received in time",
                )),
            )
            .await;
            close_with_notice(
                &state,
                &conn,
                CLOSE_PROTOCOL_ERROR,
                "join_timeout",
            )
            .await;
            return Ok(());
        }
    };

    let join = match state.codec.decode_join(&data) {
        Ok(join) => join,
        Err(e) => {
            send_event(
                &state,
                &conn,
                &EventEnvelope::Error(ErrorPayload::new(
                    "JOIN_PAYLOAD_INVALID",
                    ErrorCategory::Validation,
                    false,
                    e.to_string(),
                )),
            )
            .await;
            close_with_notice(
                &state,
                &conn,
                CLOSE_PROTOCOL_ERROR,
                "join_payload_invalid",
            )
            .await;
            return Ok(());
        }
    };
    let session_id = join.session_id.clone();

    // --- Room handshake. ---
    let (event_tx, mut event_rx) =
        tokio::sync::mpsc::unbounded_channel::<EventEnvelope>();
    let outcome = state.room.join(join, event_tx).await?;

    match outcome {
        JoinOutcome::Accepted(accepted) => {
            tracing::info!(
                %conn_id,
                session_id = %accepted.session.session_id,
                "realtime join accepted"
            );
        }
        JoinOutcome::Rejected(rejection) => {
            send_event(&state, &conn, &rejection.event).await;
            if let Some(delay) = rejection.flush_delay {
                tokio::time::sleep(delay).await;
            }
            send_event(
                &state,
                &conn,
                &EventEnvelope::Disconnect(DisconnectPayload {
                    code: rejection.close_code,
                    reason: rejection.close_reason.clone(),
                }),
            )
            .await;
            let _ = conn
                .close_with(rejection.close_code, &rejection.close_reason)
                .await;
            return Ok(());
        }
    }

    // --- Writer: drains room events into the socket. ---
    let writer_conn = Arc::clone(&conn);
    let writer_state = Arc::clone(&state);
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match writer_state.codec.encode_event(&event) {
                Ok(bytes) => {
                    if writer_conn.send(&bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "event encode failed");
                }
            }
        }
    });

    // --- Read loop: decode intents and hand them to the room. ---
    let ended = read_loop(&state, &conn, &session_id).await;
    writer.abort();

    match ended {
        ReadEnd::Consented => {
            tracing::info!(%session_id, "consented leave");
            let _ = state.room.leave(session_id).await;
        }
        ReadEnd::Abrupt => {
            tracing::info!(%session_id, "abrupt disconnect, grace starts");
            let _ = state.room.disconnect(session_id).await;
        }
    }
    Ok(())
}

enum ReadEnd {
    /// Clean close frame from the client.
    Consented,
    /// Socket error or idle timeout.
    Abrupt,
}

async fn read_loop<K, D, A>(
    state: &Arc<ServerState<K, D, A>>,
    conn: &Arc<WebSocketConnection>,
    session_id: &SessionId,
) -> ReadEnd
where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    loop {
        let data =
            match tokio::time::timeout(IDLE_TIMEOUT, conn.recv()).await {
                Ok(Ok(Some(data))) => data,
                Ok(Ok(None)) => return ReadEnd::Consented,
                Ok(Err(e)) => {
                    tracing::debug!(%session_id, error = %e, "recv error");
                    return ReadEnd::Abrupt;
                }
                Err(_) => {
                    tracing::info!(%session_id, "connection idle timeout");
                    return ReadEnd::Abrupt;
                }
            };

        let intent = match state.codec.decode_intent(&data) {
            Ok(intent) => intent,
            Err(e) => {
                // Protocol errors go straight to the socket; the room
                // never sees the frame.
                send_event(
                    state,
                    conn,
                    &EventEnvelope::Error(ErrorPayload::new(
                        "INTENT_PAYLOAD_INVALID",
                        ErrorCategory::Validation,
                        false,
                        e.to_string(),
                    )),
                )
                .await;
                continue;
            }
        };

        if state
            .room
            .intent(session_id.clone(), intent)
            .await
            .is_err()
        {
            return ReadEnd::Abrupt;
        }
    }
}

async fn send_event<K, D, A>(
    state: &Arc<ServerState<K, D, A>>,
    conn: &Arc<WebSocketConnection>,
    event: &EventEnvelope,
) where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    if let Ok(bytes) = state.codec.encode_event(event) {
        let _ = conn.send(&bytes).await;
    }
}

async fn close_with_notice<K, D, A>(
    state: &Arc<ServerState<K, D, A>>,
    conn: &Arc<WebSocketConnection>,
    code: u16,
    reason: &str,
) where
    K: KvStore,
    D: DurableStore,
    A: TokenValidator,
{
    send_event(
        state,
        conn,
        &EventEnvelope::Disconnect(DisconnectPayload {
            code,
            reason: reason.to_string(),
        }),
    )
    .await;
    let _ = conn.close_with(code, reason).await;
}
