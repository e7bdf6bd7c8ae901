//! WebSocket transport via `tokio-tungstenite`.
//!
//! Frames are sent as text (the protocol is JSON); both text and binary
//! are accepted inbound. Ping/pong is handled by tungstenite underneath.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// A WebSocket [`Transport`] listening on a TCP address.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// The local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws =
            tokio_tungstenite::accept_async(stream).await.map_err(|e| {
                TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, "accepted WebSocket connection");

        Ok(WebSocketConnection {
            id,
            ws: Arc::new(Mutex::new(ws)),
        })
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A single WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    ws: Arc<Mutex<WsStream>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        use futures_util::SinkExt;
        let text = String::from_utf8_lossy(data).into_owned();
        self.ws
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        use futures_util::StreamExt;
        loop {
            let msg = self.ws.lock().await.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.ws.lock().await.close(None).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn close_with(
        &self,
        code: u16,
        reason: &str,
    ) -> Result<(), Self::Error> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        match self.ws.lock().await.close(Some(frame)).await {
            Ok(()) => Ok(()),
            // Closing an already-closed socket is not a fault.
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => {
                Ok(())
            }
            Err(e) => Err(TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};

    async fn bind_transport() -> (WebSocketTransport, String) {
        let transport =
            WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr().unwrap().to_string();
        (transport, addr)
    }

    #[tokio::test]
    async fn test_accept_and_echo_text() {
        let (mut transport, addr) = bind_transport().await;

        let client = tokio::spawn(async move {
            let (mut ws, _) =
                tokio_tungstenite::connect_async(format!("ws://{addr}"))
                    .await
                    .unwrap();
            ws.send(Message::Text("hello".into())).await.unwrap();
            let reply = ws.next().await.unwrap().unwrap();
            assert_eq!(reply.into_text().unwrap().as_str(), "hello");
        });

        let conn = transport.accept().await.unwrap();
        let data = conn.recv().await.unwrap().unwrap();
        assert_eq!(data, b"hello");
        conn.send(&data).await.unwrap();

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_with_code_reaches_client() {
        let (mut transport, addr) = bind_transport().await;

        let client = tokio::spawn(async move {
            let (mut ws, _) =
                tokio_tungstenite::connect_async(format!("ws://{addr}"))
                    .await
                    .unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(Some(frame)))) => {
                        assert_eq!(u16::from(frame.code), 4408);
                        assert_eq!(frame.reason.as_str(), "version_mismatch");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("expected close frame, got {other:?}"),
                }
            }
        });

        let conn = transport.accept().await.unwrap();
        conn.close_with(4408, "version_mismatch").await.unwrap();

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_reports_clean_close() {
        let (mut transport, addr) = bind_transport().await;

        let client = tokio::spawn(async move {
            let (mut ws, _) =
                tokio_tungstenite::connect_async(format!("ws://{addr}"))
                    .await
                    .unwrap();
            ws.close(None).await.unwrap();
        });

        let conn = transport.accept().await.unwrap();
        assert!(conn.recv().await.unwrap().is_none());
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let (mut transport, addr) = bind_transport().await;

        let _c1 = tokio::spawn({
            let addr = addr.clone();
            async move {
                tokio_tungstenite::connect_async(format!("ws://{addr}"))
                    .await
                    .unwrap()
            }
        });
        let _c2 = tokio::spawn(async move {
            tokio_tungstenite::connect_async(format!("ws://{addr}"))
                .await
                .unwrap()
        });

        let a = transport.accept().await.unwrap();
        let b = transport.accept().await.unwrap();
        assert_ne!(a.id(), b.id());
    }
}
