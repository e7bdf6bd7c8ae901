//! Transport abstraction for the TileMUD realtime surface.
//!
//! Provides the [`Transport`] and [`Connection`] traits the server core
//! is written against, plus the default WebSocket implementation. The
//! realtime protocol needs one capability beyond plain byte streams:
//! closing with an application close code (4401, 4408) and reason, which
//! [`Connection::close_with`] exposes.
//!
//! # Feature flags
//!
//! - `websocket` (default) — WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Stops accepting new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single connection carrying protocol frames.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame to the peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame. `Ok(None)` means a clean close.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes with the default close code.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Closes with an application close code and reason. The core uses
    /// 4401 for auth failures and 4408 for version mismatches.
    async fn close_with(
        &self,
        code: u16,
        reason: &str,
    ) -> Result<(), Self::Error>;

    /// The unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
